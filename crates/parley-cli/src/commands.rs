//! Subcommand implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use chrono_tz::Tz;
use parley_calendar::{
    AccountFailure, AvailabilityAggregator, AvailabilityOptions, FixtureCalendarProvider,
    SlotQuery, TimeInterval, parse_timezone,
};
use parley_core::compose;
use parley_core::{
    AcknowledgingAgent, InboundProcessor, ParleyConfig, ProcessOutcome, RecordingTransport,
    SchedulingServices,
};
use parley_exchange::{ExchangeStore, RawMessage};
use tracing::info;
use uuid::Uuid;

use crate::WindowArgs;

fn open_store(config: &ParleyConfig) -> Result<ExchangeStore> {
    let path = &config.storage.db_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = ExchangeStore::new(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(store.with_limits(config.engagement_limits()))
}

fn display_timezone(config: &ParleyConfig, requested: Option<&str>) -> Result<Tz> {
    match requested {
        Some(name) => Ok(parse_timezone(name)?),
        None => Ok(config.default_timezone()),
    }
}

fn load_fixture(path: &Path) -> Result<AvailabilityAggregator> {
    let provider = FixtureCalendarProvider::load(path)
        .with_context(|| format!("Failed to load calendar fixture {}", path.display()))?;
    Ok(AvailabilityAggregator::new(Arc::new(provider)))
}

fn print_failures(failures: &[AccountFailure]) {
    for failure in failures {
        eprintln!(
            "warning: account {} ({}) skipped: {}",
            failure.account_id,
            failure.calendar_ids.join(", "),
            failure.error
        );
    }
}

pub async fn init(config: &ParleyConfig) -> Result<()> {
    open_store(config)?;
    println!("Database ready at {}", config.storage.db_path.display());
    Ok(())
}

pub async fn add_user(
    config: &ParleyConfig,
    email: &str,
    name: &str,
    timezone: Option<&str>,
) -> Result<()> {
    let timezone = match timezone {
        Some(tz) => parse_timezone(tz)?.name().to_string(),
        None => config.slots.default_timezone.clone(),
    };
    let store = open_store(config)?;
    let user = store.upsert_user(email, name, &timezone).await?;
    info!("Registered user {}", user.email);
    println!("{} {} ({}, {})", user.id, user.email, user.display_name(), user.timezone);
    Ok(())
}

pub async fn slots(
    config: &ParleyConfig,
    args: &WindowArgs,
    duration: Option<i64>,
    max: Option<usize>,
) -> Result<()> {
    let aggregator = load_fixture(&args.fixture)?;
    let tz = display_timezone(config, args.timezone.as_deref())?;
    let window = TimeInterval::parse(&args.start, &args.end)?;

    let query = SlotQuery::new(
        window,
        duration.unwrap_or(config.slots.default_duration_minutes),
        tz,
    )
    .with_granularity(config.slots.granularity_minutes)
    .with_max_results(max.unwrap_or(config.slots.max_results));

    let search = aggregator
        .find_bookable_slots(&args.user, &query, &[])
        .await?;
    print_failures(&search.failures);

    let intervals: Vec<TimeInterval> = search.slots.iter().map(|s| s.interval).collect();
    println!("{}", compose::format_slots(&intervals, &tz));
    Ok(())
}

pub async fn availability(config: &ParleyConfig, args: &WindowArgs) -> Result<()> {
    let aggregator = load_fixture(&args.fixture)?;
    let tz = display_timezone(config, args.timezone.as_deref())?;
    let window = TimeInterval::parse(&args.start, &args.end)?;
    let options = AvailabilityOptions::new(tz, config.slots.default_duration_minutes);

    let report = aggregator
        .check_availability(&args.user, &window, &options)
        .await?;
    print_failures(&report.failures);

    println!("Busy:");
    for busy in &report.busy {
        println!("  {}", compose::format_interval(busy, &tz));
    }
    println!("Free:");
    for free in &report.free {
        println!("  {}", compose::format_interval(free, &tz));
    }
    if !report.events.is_empty() {
        println!("Events:");
        for event in &report.events {
            println!("{}\n", compose::format_event_summary(event, &tz));
        }
    }
    Ok(())
}

pub async fn process(config: &ParleyConfig, raw: &Path, fixture: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(raw)
        .with_context(|| format!("Failed to read {}", raw.display()))?;
    let message: RawMessage =
        serde_json::from_str(&content).context("Inbound message is not valid JSON")?;

    let provider = match fixture {
        Some(path) => FixtureCalendarProvider::load(path)?,
        None => FixtureCalendarProvider::from_json("{}")?,
    };
    let store = Arc::new(open_store(config)?);
    let mail = Arc::new(RecordingTransport::new(config.assistant.own_domain.clone()));
    let services = Arc::new(SchedulingServices {
        aggregator: Arc::new(AvailabilityAggregator::new(Arc::new(provider))),
        store: store.clone(),
        mail: mail.clone(),
        config: Arc::new(config.clone()),
    });
    let processor = InboundProcessor::new(
        services,
        store,
        Arc::new(AcknowledgingAgent::new(config.assistant.name.clone())),
    );

    match processor.process(&message).await? {
        ProcessOutcome::Duplicate { message_id } => {
            println!("Duplicate: {} was already processed", message_id);
        }
        ProcessOutcome::Handled {
            route,
            exchange_id,
            sent,
        } => {
            println!("Route: {}", route);
            println!("Exchange: {}", exchange_id);
            for item in sent {
                println!("\n--- {} ---", item.message_id);
                println!("To: {}", item.email.to.join(", "));
                if !item.email.cc.is_empty() {
                    println!("Cc: {}", item.email.cc.join(", "));
                }
                if let Some(in_reply_to) = &item.email.in_reply_to {
                    println!("In-Reply-To: {}", in_reply_to);
                }
                println!("Subject: {}\n", item.email.subject);
                println!("{}", item.email.body.as_str());
            }
        }
    }
    Ok(())
}

pub async fn thread(config: &ParleyConfig, exchange_id: Uuid) -> Result<()> {
    let store = open_store(config)?;
    let messages = store.get_all_messages_in_exchange(exchange_id).await?;
    if messages.is_empty() {
        println!("No messages in exchange {}", exchange_id);
        return Ok(());
    }

    let owner = store.get_exchange_owner(exchange_id).await?;
    println!(
        "Exchange {} (owner: {})",
        exchange_id,
        owner.as_deref().unwrap_or("none")
    );
    for m in messages {
        println!(
            "\n[{}] {} {} -> {}",
            m.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            m.message_type,
            m.sender,
            m.recipients.join(", ")
        );
        println!("  id: {}", m.message_id);
        if let Some(previous) = &m.previous_message_id {
            println!("  in reply to: {}", previous);
        }
        println!("  subject: {}", m.subject);
        println!("  {}", m.body);
    }
    Ok(())
}

pub async fn exchanges(config: &ParleyConfig, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let summaries = store.list_exchanges(limit).await?;
    if summaries.is_empty() {
        println!("No exchanges stored");
        return Ok(());
    }
    for s in summaries {
        println!(
            "{}  owner={}  messages={}  first={}  last={}",
            s.exchange_id,
            s.owner_id.as_deref().unwrap_or("-"),
            s.message_count,
            s.first_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            s.last_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> ParleyConfig {
        let mut config = ParleyConfig::default();
        config.storage.db_path = dir.join("nested").join("parley.db");
        config
    }

    #[tokio::test]
    async fn test_init_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        init(&config).await.unwrap();
        assert!(config.storage.db_path.exists());
    }

    #[tokio::test]
    async fn test_process_then_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        add_user(&config, "ana@example.com", "Ana", Some("Europe/Paris"))
            .await
            .unwrap();

        let raw_path = dir.path().join("inbound.json");
        std::fs::write(
            &raw_path,
            r#"{
                "message_id": "<m1@x>",
                "sender": "Ana <ana@example.com>",
                "recipients": ["bob@x.com", "assistant@parley.ai"],
                "raw_subject": "Lunch",
                "raw_body": "Find us an hour next week",
                "timestamp": "2024-03-05T09:00:00Z"
            }"#,
        )
        .unwrap();
        process(&config, &raw_path, None).await.unwrap();
        // a second delivery is a no-op
        process(&config, &raw_path, None).await.unwrap();

        let store = open_store(&config).unwrap();
        let summaries = store.list_exchanges(10).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 2);
        assert_eq!(summaries[0].owner_id.as_deref(), Some("ana@example.com"));

        thread(&config, summaries[0].exchange_id).await.unwrap();
        exchanges(&config, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_user_rejects_bad_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(
            add_user(&config, "ana@example.com", "Ana", Some("Nowhere/Land"))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_display_timezone_default() {
        let config = ParleyConfig::default();
        assert_eq!(display_timezone(&config, None).unwrap(), Tz::UTC);
        assert_eq!(
            display_timezone(&config, Some("Asia/Tokyo")).unwrap(),
            chrono_tz::Asia::Tokyo
        );
    }
}
