//! parley: operator CLI for the scheduling assistant
//!
//! Usage:
//!   parley init
//!   parley add-user --email ana@example.com --name Ana --timezone America/New_York
//!   parley slots --fixture calendars.json --user ana@example.com \
//!       --start 2024-03-05T09:00:00Z --end 2024-03-05T17:00:00Z
//!   parley process inbound.json --fixture calendars.json
//!   parley exchanges

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_core::ParleyConfig;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Email scheduling assistant: threads, ownership and free/busy")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/parley/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database
    Init,

    /// Register or update a system user
    AddUser {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        name: String,
        /// IANA timezone (default from config)
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Find bookable slots against a calendar fixture
    Slots {
        #[command(flatten)]
        window: WindowArgs,
        /// Meeting length in minutes
        #[arg(long)]
        duration: Option<i64>,
        /// Maximum number of slots
        #[arg(long)]
        max: Option<usize>,
    },

    /// Show busy, free and events against a calendar fixture
    Availability {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Run one inbound email (JSON) through the full pipeline without sending mail
    Process {
        /// Inbound message JSON file
        #[arg(value_name = "RAW")]
        raw: PathBuf,
        /// Calendar fixture for the agent's tools
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Print every stored message of an exchange
    Thread {
        #[arg(value_name = "EXCHANGE_ID")]
        exchange_id: Uuid,
    },

    /// List the most recently active exchanges
    Exchanges {
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
}

#[derive(clap::Args)]
struct WindowArgs {
    /// Calendar fixture JSON
    #[arg(long)]
    fixture: PathBuf,
    /// User id in the fixture (the user's email)
    #[arg(long)]
    user: String,
    /// Window start (RFC 3339)
    #[arg(long)]
    start: String,
    /// Window end (RFC 3339)
    #[arg(long)]
    end: String,
    /// Display timezone (default from config)
    #[arg(long)]
    timezone: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(ParleyConfig::default_path);
    let config = ParleyConfig::load(&config_path)?;

    match cli.command {
        Commands::Init => commands::init(&config).await,
        Commands::AddUser {
            email,
            name,
            timezone,
        } => commands::add_user(&config, &email, &name, timezone.as_deref()).await,
        Commands::Slots {
            window,
            duration,
            max,
        } => commands::slots(&config, &window, duration, max).await,
        Commands::Availability { window } => commands::availability(&config, &window).await,
        Commands::Process { raw, fixture } => {
            commands::process(&config, &raw, fixture.as_deref()).await
        }
        Commands::Thread { exchange_id } => commands::thread(&config, exchange_id).await,
        Commands::Exchanges { limit } => commands::exchanges(&config, limit).await,
    }
}
