//! Calendar error taxonomy

use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    /// Malformed input rejected at construction time
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Provider unreachable or returned an error
    #[error("calendar provider error: {0}")]
    Transport(String),

    #[error("free/busy failed for all {attempted} calendar accounts")]
    AllAccountsFailed { attempted: usize },
}

impl CalendarError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the failed operation can be retried without side effects
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::AllAccountsFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, CalendarError>;

/// Parse an IANA timezone name such as `America/New_York`
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CalendarError::InvalidTimezone(name.to_string()))
}
