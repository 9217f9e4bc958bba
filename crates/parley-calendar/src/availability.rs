//! Multi-account availability aggregation
//!
//! Free/busy is queried once per external account with all of that account's
//! calendars batched together. Accounts are queried concurrently and a failing
//! account only removes its own calendars from the picture.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono_tz::Tz;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{CalendarError, Result};
use crate::interval::{BusyWindow, TimeInterval, free_windows, merge};
use crate::provider::{CalendarConnection, CalendarEvent, CalendarProvider};
use crate::slot::{CandidateSlot, SlotQuery, find_slots};

/// Options for an availability check
#[derive(Debug, Clone)]
pub struct AvailabilityOptions {
    /// Only consider these calendars (all connected calendars when `None`)
    pub include_calendar_ids: Option<Vec<String>>,
    pub exclude_calendar_ids: Vec<String>,
    pub response_timezone: Tz,
    /// Free runs shorter than this are dropped
    pub slot_duration_minutes: i64,
}

impl AvailabilityOptions {
    pub fn new(response_timezone: Tz, slot_duration_minutes: i64) -> Self {
        Self {
            include_calendar_ids: None,
            exclude_calendar_ids: Vec::new(),
            response_timezone,
            slot_duration_minutes,
        }
    }

    fn selects(&self, calendar_id: &str) -> bool {
        let included = self
            .include_calendar_ids
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|id| id == calendar_id));
        included && !self.exclude_calendar_ids.iter().any(|id| id == calendar_id)
    }
}

/// One account whose free/busy query failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFailure {
    pub account_id: String,
    pub calendar_ids: Vec<String>,
    pub error: String,
}

/// Unified busy/free picture across all selected calendars
#[derive(Debug, Clone)]
pub struct AvailabilityReport {
    pub window: TimeInterval,
    /// Merged busy blocks
    pub busy: Vec<TimeInterval>,
    /// Raw busy blocks tagged with their calendar
    pub busy_windows: Vec<BusyWindow>,
    pub free: Vec<TimeInterval>,
    pub events: Vec<CalendarEvent>,
    pub timezone: Tz,
    pub failures: Vec<AccountFailure>,
}

impl AvailabilityReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of a bookable-slot search
#[derive(Debug, Clone)]
pub struct SlotSearch {
    pub slots: Vec<CandidateSlot>,
    pub failures: Vec<AccountFailure>,
}

pub struct AvailabilityAggregator {
    provider: Arc<dyn CalendarProvider>,
}

impl AvailabilityAggregator {
    pub fn new(provider: Arc<dyn CalendarProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn CalendarProvider> {
        &self.provider
    }

    /// Selected connections grouped by account, in account id order
    async fn accounts_for(
        &self,
        user_id: &str,
        options: &AvailabilityOptions,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let connections = self.provider.connections(user_id).await?;
        let mut accounts: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for CalendarConnection {
            account_id,
            calendar_id,
            ..
        } in connections
        {
            if !options.selects(&calendar_id) {
                continue;
            }
            let calendars = accounts.entry(account_id).or_default();
            if !calendars.contains(&calendar_id) {
                calendars.push(calendar_id);
            }
        }
        Ok(accounts)
    }

    /// Busy/free/events for `user_id` across every selected calendar.
    ///
    /// Fails only when every account query fails; otherwise the failures are
    /// listed on the report.
    pub async fn check_availability(
        &self,
        user_id: &str,
        window: &TimeInterval,
        options: &AvailabilityOptions,
    ) -> Result<AvailabilityReport> {
        let accounts = self.accounts_for(user_id, options).await?;
        if accounts.is_empty() {
            warn!("No connected calendars selected for user {}", user_id);
        }

        let queries = accounts.iter().map(|(account_id, calendar_ids)| async move {
            let outcome = self
                .provider
                .free_busy(account_id, window, calendar_ids)
                .await;
            (account_id, calendar_ids, outcome)
        });

        let mut busy_windows = Vec::new();
        let mut failures = Vec::new();
        let mut healthy_calendars = Vec::new();

        for (account_id, calendar_ids, outcome) in join_all(queries).await {
            match outcome {
                Ok(by_calendar) => {
                    for (calendar_id, intervals) in by_calendar {
                        busy_windows.extend(intervals.into_iter().map(|interval| BusyWindow {
                            calendar_id: calendar_id.clone(),
                            interval,
                        }));
                    }
                    healthy_calendars.extend(calendar_ids.iter().cloned());
                }
                Err(e) => {
                    warn!(
                        "Free/busy failed for account {} ({} calendars): {}",
                        account_id,
                        calendar_ids.len(),
                        e
                    );
                    failures.push(AccountFailure {
                        account_id: account_id.clone(),
                        calendar_ids: calendar_ids.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !accounts.is_empty() && failures.len() == accounts.len() {
            return Err(CalendarError::AllAccountsFailed {
                attempted: accounts.len(),
            });
        }

        let events = self.collect_events(&healthy_calendars, window).await;

        let raw: Vec<TimeInterval> = busy_windows.iter().map(|b| b.interval).collect();
        let busy = merge(&raw);
        let free = free_windows(window, &busy, options.slot_duration_minutes);

        info!(
            "Availability for {}: {} busy block(s), {} free run(s), {} account failure(s)",
            user_id,
            busy.len(),
            free.len(),
            failures.len()
        );

        Ok(AvailabilityReport {
            window: *window,
            busy,
            busy_windows,
            free,
            events,
            timezone: options.response_timezone,
            failures,
        })
    }

    async fn collect_events(
        &self,
        calendar_ids: &[String],
        window: &TimeInterval,
    ) -> Vec<CalendarEvent> {
        let listings = calendar_ids.iter().map(|calendar_id| async move {
            (calendar_id, self.provider.list_events(calendar_id, window).await)
        });

        let mut events = Vec::new();
        for (calendar_id, outcome) in join_all(listings).await {
            match outcome {
                Ok(found) => events.extend(found),
                Err(e) => warn!("Listing events failed for calendar {}: {}", calendar_id, e),
            }
        }
        events.sort_by_key(|e| e.start);
        events
    }

    /// Availability check followed by the slot finder over the merged busy set
    pub async fn find_bookable_slots(
        &self,
        user_id: &str,
        query: &SlotQuery,
        exclude: &[TimeInterval],
    ) -> Result<SlotSearch> {
        query.validate()?;
        let options = AvailabilityOptions::new(query.timezone, query.duration_minutes);
        let report = self
            .check_availability(user_id, &query.window, &options)
            .await?;
        let slots = find_slots(query, &report.busy, exclude)?;
        Ok(SlotSearch {
            slots,
            failures: report.failures,
        })
    }

    /// Look an event up across all of the user's calendars
    pub async fn find_event(&self, user_id: &str, event_id: &str) -> Result<CalendarEvent> {
        let connections = self.provider.connections(user_id).await?;
        for connection in connections {
            match self
                .provider
                .get_event(&connection.calendar_id, event_id)
                .await
            {
                Ok(event) => return Ok(event),
                Err(CalendarError::NotFound { .. }) => continue,
                Err(e) => {
                    debug!(
                        "Event lookup on calendar {} failed: {}",
                        connection.calendar_id, e
                    );
                }
            }
        }
        Err(CalendarError::not_found("event", event_id))
    }
}
