//! Calendar provider port
//!
//! The provider speaks to the remote calendar service. Free/busy queries are
//! batched per external account; event CRUD is addressed by calendar id and
//! event id.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::interval::TimeInterval;

/// A calendar a user has connected through an external account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConnection {
    /// External account the calendar belongs to (one OAuth grant)
    pub account_id: String,
    pub calendar_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub primary: bool,
}

/// Calendar event as returned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

impl CalendarEvent {
    pub fn interval(&self) -> Result<TimeInterval> {
        TimeInterval::new(self.start, self.end)
    }
}

/// Fields for creating or replacing an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub interval: TimeInterval,
    pub attendees: Vec<String>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Calendars the user has connected, across all accounts
    async fn connections(&self, user_id: &str) -> Result<Vec<CalendarConnection>>;

    /// One free/busy round-trip for a single account covering `calendar_ids`
    async fn free_busy(
        &self,
        account_id: &str,
        range: &TimeInterval,
        calendar_ids: &[String],
    ) -> Result<HashMap<String, Vec<TimeInterval>>>;

    /// Events on one calendar overlapping `range`
    async fn list_events(&self, calendar_id: &str, range: &TimeInterval)
    -> Result<Vec<CalendarEvent>>;

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent>;

    async fn create_event(&self, calendar_id: &str, draft: EventDraft) -> Result<CalendarEvent>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        draft: EventDraft,
    ) -> Result<CalendarEvent>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()>;
}
