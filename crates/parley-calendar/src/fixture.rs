//! JSON-backed calendar provider
//!
//! Loads accounts, calendars, busy blocks and events from a JSON document so
//! slot searches can run without a live calendar service.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CalendarError, Result};
use crate::interval::TimeInterval;
use crate::provider::{CalendarConnection, CalendarEvent, CalendarProvider, EventDraft};

#[derive(Debug, Default, Deserialize)]
struct FixtureDocument {
    /// user id -> connected calendars
    #[serde(default)]
    users: HashMap<String, Vec<CalendarConnection>>,
    /// calendar id -> opaque busy blocks
    #[serde(default)]
    busy: HashMap<String, Vec<TimeInterval>>,
    #[serde(default)]
    events: Vec<CalendarEvent>,
    /// Accounts whose free/busy queries fail, for exercising partial results
    #[serde(default)]
    unavailable_accounts: Vec<String>,
}

struct FixtureState {
    events: Vec<CalendarEvent>,
    next_event: u64,
}

pub struct FixtureCalendarProvider {
    users: HashMap<String, Vec<CalendarConnection>>,
    busy: HashMap<String, Vec<TimeInterval>>,
    unavailable_accounts: Vec<String>,
    state: Mutex<FixtureState>,
}

impl FixtureCalendarProvider {
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: FixtureDocument = serde_json::from_str(json)
            .map_err(|e| CalendarError::Validation(format!("invalid calendar fixture: {}", e)))?;

        for event in &doc.events {
            event.interval()?;
        }

        let next_event = doc.events.len() as u64 + 1;
        Ok(Self {
            users: doc.users,
            busy: doc.busy,
            unavailable_accounts: doc.unavailable_accounts,
            state: Mutex::new(FixtureState {
                events: doc.events,
                next_event,
            }),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CalendarError::Transport(format!(
                "cannot read fixture {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Fixture mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn owns_calendar(&self, calendar_id: &str) -> bool {
        self.users
            .values()
            .flatten()
            .any(|c| c.calendar_id == calendar_id)
    }
}

#[async_trait]
impl CalendarProvider for FixtureCalendarProvider {
    async fn connections(&self, user_id: &str) -> Result<Vec<CalendarConnection>> {
        Ok(self.users.get(user_id).cloned().unwrap_or_default())
    }

    async fn free_busy(
        &self,
        account_id: &str,
        range: &TimeInterval,
        calendar_ids: &[String],
    ) -> Result<HashMap<String, Vec<TimeInterval>>> {
        if self.unavailable_accounts.iter().any(|a| a == account_id) {
            return Err(CalendarError::Transport(format!(
                "account {} is unavailable",
                account_id
            )));
        }

        let state = self.state();
        let mut result = HashMap::new();
        for calendar_id in calendar_ids {
            let mut blocks: Vec<TimeInterval> = self
                .busy
                .get(calendar_id)
                .into_iter()
                .flatten()
                .filter(|b| b.overlaps(range))
                .copied()
                .collect();
            for event in state.events.iter().filter(|e| &e.calendar_id == calendar_id) {
                let interval = event.interval()?;
                if interval.overlaps(range) {
                    blocks.push(interval);
                }
            }
            result.insert(calendar_id.clone(), blocks);
        }

        debug!(
            "Fixture free/busy for account {}: {} calendar(s)",
            account_id,
            result.len()
        );
        Ok(result)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        range: &TimeInterval,
    ) -> Result<Vec<CalendarEvent>> {
        let state = self.state();
        let mut events = Vec::new();
        for event in state.events.iter().filter(|e| e.calendar_id == calendar_id) {
            if event.interval()?.overlaps(range) {
                events.push(event.clone());
            }
        }
        Ok(events)
    }

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent> {
        self.state()
            .events
            .iter()
            .find(|e| e.calendar_id == calendar_id && e.id == event_id)
            .cloned()
            .ok_or_else(|| CalendarError::not_found("event", event_id))
    }

    async fn create_event(&self, calendar_id: &str, draft: EventDraft) -> Result<CalendarEvent> {
        if !self.owns_calendar(calendar_id) {
            return Err(CalendarError::not_found("calendar", calendar_id));
        }

        let mut state = self.state();
        let event = CalendarEvent {
            id: format!("evt-{}", state.next_event),
            calendar_id: calendar_id.to_string(),
            summary: draft.summary,
            description: draft.description,
            location: draft.location,
            start: draft.interval.start(),
            end: draft.interval.end(),
            attendees: draft.attendees,
        };
        state.next_event += 1;
        state.events.push(event.clone());
        Ok(event)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        draft: EventDraft,
    ) -> Result<CalendarEvent> {
        let mut state = self.state();
        let event = state
            .events
            .iter_mut()
            .find(|e| e.calendar_id == calendar_id && e.id == event_id)
            .ok_or_else(|| CalendarError::not_found("event", event_id))?;

        event.summary = draft.summary;
        event.description = draft.description;
        event.location = draft.location;
        event.start = draft.interval.start();
        event.end = draft.interval.end();
        event.attendees = draft.attendees;
        Ok(event.clone())
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()> {
        let mut state = self.state();
        let before = state.events.len();
        state
            .events
            .retain(|e| !(e.calendar_id == calendar_id && e.id == event_id));
        if state.events.len() == before {
            return Err(CalendarError::not_found("event", event_id));
        }
        Ok(())
    }
}
