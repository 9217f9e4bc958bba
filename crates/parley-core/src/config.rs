//! Configuration loaded from `config.toml`
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use anyhow::{Context, Result, bail};
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use parley_exchange::EngagementLimits;

/// Directory holding `config.toml` and, by default, the database
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engagement: EngagementConfig,
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_address")]
    pub address: String,
    /// Addresses on this domain never receive replies
    #[serde(default = "default_own_domain")]
    pub own_domain: String,
}

fn default_name() -> String {
    "Parley".to_string()
}
fn default_address() -> String {
    "assistant@parley.ai".to_string()
}
fn default_own_domain() -> String {
    "parley.ai".to_string()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: default_address(),
            own_domain: default_own_domain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    config_dir().join("parley.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
}

fn default_max_messages() -> usize {
    25
}
fn default_max_age_days() -> i64 {
    30
}
fn default_max_body_chars() -> usize {
    1000
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_age_days: default_max_age_days(),
            max_body_chars: default_max_body_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotsConfig {
    #[serde(default = "default_granularity")]
    pub granularity_minutes: i64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_duration")]
    pub default_duration_minutes: i64,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

fn default_granularity() -> i64 {
    15
}
fn default_max_results() -> usize {
    3
}
fn default_duration() -> i64 {
    30
}
fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            granularity_minutes: default_granularity(),
            max_results: default_max_results(),
            default_duration_minutes: default_duration(),
            default_timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Inline prompt text, or `@path/to/file` to read it from disk
    #[serde(default = "default_first_party_prompt")]
    pub first_party_prompt: String,
    #[serde(default = "default_third_party_prompt")]
    pub third_party_prompt: String,
    #[serde(default = "default_first_party_tools")]
    pub first_party_tools: Vec<String>,
    #[serde(default = "default_third_party_tools")]
    pub third_party_tools: Vec<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_first_party_prompt() -> String {
    "You schedule meetings on behalf of the user who wrote this email. \
     Use the tools to check their calendar and to email attendees."
        .to_string()
}
fn default_third_party_prompt() -> String {
    "You are negotiating a meeting time with a guest on behalf of the \
     exchange owner. Only offer times the owner's calendar allows."
        .to_string()
}
fn default_first_party_tools() -> Vec<String> {
    vec![
        "find_bookable_slots".to_string(),
        "check_busy_status".to_string(),
        "request_scheduling_over_email".to_string(),
        "request_rescheduling_over_email".to_string(),
    ]
}
fn default_third_party_tools() -> Vec<String> {
    vec!["find_bookable_slots".to_string()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            first_party_prompt: default_first_party_prompt(),
            third_party_prompt: default_third_party_prompt(),
            first_party_tools: default_first_party_tools(),
            third_party_tools: default_third_party_tools(),
        }
    }
}

impl ParleyConfig {
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots.granularity_minutes <= 0
            || Duration::try_minutes(self.slots.granularity_minutes).is_none()
        {
            bail!("slots.granularity_minutes must be a positive number of minutes in range");
        }
        if self.slots.max_results == 0 {
            bail!("slots.max_results must be positive");
        }
        if self.slots.default_duration_minutes <= 0
            || Duration::try_minutes(self.slots.default_duration_minutes).is_none()
        {
            bail!("slots.default_duration_minutes must be a positive number of minutes in range");
        }
        parley_calendar::parse_timezone(&self.slots.default_timezone)
            .context("slots.default_timezone")?;
        if self.assistant.own_domain.trim().trim_start_matches('@').is_empty() {
            bail!("assistant.own_domain must not be empty");
        }
        if self.engagement.max_messages == 0 {
            bail!("engagement.max_messages must be positive");
        }
        if self.engagement.max_age_days <= 0 {
            bail!("engagement.max_age_days must be positive");
        }
        if Duration::try_days(self.engagement.max_age_days).is_none() {
            bail!(
                "engagement.max_age_days is out of range: {}",
                self.engagement.max_age_days
            );
        }
        if self.engagement.max_body_chars == 0 {
            bail!("engagement.max_body_chars must be positive");
        }
        Ok(())
    }

    pub fn engagement_limits(&self) -> EngagementLimits {
        EngagementLimits {
            max_messages: self.engagement.max_messages,
            max_age: Duration::try_days(self.engagement.max_age_days).unwrap_or(Duration::MAX),
        }
    }

    /// The validated default timezone; UTC if it somehow fails to parse
    pub fn default_timezone(&self) -> Tz {
        parley_calendar::parse_timezone(&self.slots.default_timezone).unwrap_or(Tz::UTC)
    }

    /// Timezone for a user, falling back to the configured default
    pub fn timezone_for(&self, user_timezone: &str) -> Tz {
        parley_calendar::parse_timezone(user_timezone).unwrap_or_else(|_| {
            debug!(
                "Unknown user timezone '{}', using {}",
                user_timezone, self.slots.default_timezone
            );
            self.default_timezone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ParleyConfig::parse("").unwrap();
        assert_eq!(config.assistant.name, "Parley");
        assert_eq!(config.slots.granularity_minutes, 15);
        assert_eq!(config.slots.max_results, 3);
        assert_eq!(config.engagement_limits(), EngagementLimits::default());
        assert_eq!(config.default_timezone(), Tz::UTC);
        assert_eq!(config.agent.third_party_tools, vec!["find_bookable_slots"]);
    }

    #[test]
    fn test_partial_sections() {
        let config = ParleyConfig::parse(
            r#"
            [assistant]
            own_domain = "example.org"

            [slots]
            default_timezone = "Europe/Berlin"
            granularity_minutes = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.assistant.own_domain, "example.org");
        assert_eq!(config.assistant.address, "assistant@parley.ai");
        assert_eq!(config.slots.granularity_minutes, 30);
        assert_eq!(config.default_timezone(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ParleyConfig::parse("[slots]\ngranularity_minutes = 0").is_err());
        assert!(ParleyConfig::parse("[slots]\nmax_results = 0").is_err());
        assert!(ParleyConfig::parse("[slots]\ndefault_timezone = \"Mars/Olympus\"").is_err());
        assert!(ParleyConfig::parse("[assistant]\nown_domain = \"\"").is_err());
        assert!(ParleyConfig::parse("[engagement]\nmax_age_days = -1").is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_lengths() {
        assert!(ParleyConfig::parse("[engagement]\nmax_age_days = 9223372036854775807").is_err());
        assert!(ParleyConfig::parse("[engagement]\nmax_age_days = 1000000000000000").is_err());
        assert!(
            ParleyConfig::parse("[slots]\ndefault_duration_minutes = 9223372036854775807").is_err()
        );
        assert!(ParleyConfig::parse("[slots]\ngranularity_minutes = 9223372036854775807").is_err());
    }

    #[test]
    fn test_engagement_limits_never_panic() {
        let mut config = ParleyConfig::default();
        config.engagement.max_age_days = i64::MAX;
        assert_eq!(config.engagement_limits().max_age, Duration::MAX);

        config.engagement.max_age_days = 30;
        assert_eq!(config.engagement_limits().max_age, Duration::days(30));
    }

    #[test]
    fn test_load_missing_and_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ParleyConfig::load(&path).unwrap();
        assert_eq!(config.engagement.max_messages, 25);

        std::fs::write(&path, "[engagement]\nmax_messages = 10\n").unwrap();
        let config = ParleyConfig::load(&path).unwrap();
        assert_eq!(config.engagement_limits().max_messages, 10);
    }

    #[test]
    fn test_timezone_for_falls_back() {
        let config = ParleyConfig::default();
        assert_eq!(config.timezone_for("Asia/Tokyo"), chrono_tz::Asia::Tokyo);
        assert_eq!(config.timezone_for("nowhere"), Tz::UTC);
    }
}
