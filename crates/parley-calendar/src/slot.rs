//! Fixed-granularity slot finder
//!
//! The scan starts at the window start rounded down to a granularity boundary
//! in the requested timezone and advances one granularity step at a time.
//! Accepted slots do not advance the cursor by their own duration, so two
//! accepted slots may overlap when the free run is long enough.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::error::{CalendarError, Result};
use crate::interval::{TimeInterval, merge};

pub const DEFAULT_GRANULARITY_MINUTES: i64 = 15;
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Parameters for a slot search
#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub window: TimeInterval,
    pub duration_minutes: i64,
    pub granularity_minutes: i64,
    pub max_results: usize,
    pub timezone: Tz,
}

impl SlotQuery {
    pub fn new(window: TimeInterval, duration_minutes: i64, timezone: Tz) -> Self {
        Self {
            window,
            duration_minutes,
            granularity_minutes: DEFAULT_GRANULARITY_MINUTES,
            max_results: DEFAULT_MAX_RESULTS,
            timezone,
        }
    }

    pub fn with_granularity(mut self, minutes: i64) -> Self {
        self.granularity_minutes = minutes;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Check the parameters and return `(duration, step)`
    pub(crate) fn validate(&self) -> Result<(Duration, Duration)> {
        let duration = positive_minutes("duration", self.duration_minutes)?;
        let step = positive_minutes("granularity", self.granularity_minutes)?;
        Ok((duration, step))
    }
}

fn positive_minutes(label: &str, minutes: i64) -> Result<Duration> {
    if minutes <= 0 {
        return Err(CalendarError::Validation(format!(
            "slot {} must be positive, got {} minutes",
            label, minutes
        )));
    }
    Duration::try_minutes(minutes).ok_or_else(|| {
        CalendarError::Validation(format!(
            "slot {} of {} minutes is out of range",
            label, minutes
        ))
    })
}

/// A bookable slot, numbered in discovery order starting at 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSlot {
    pub order: usize,
    pub interval: TimeInterval,
}

/// Round `instant` down to the previous `granularity_minutes` boundary of the
/// local wall clock in `tz`.
fn round_down_local(instant: DateTime<Utc>, granularity_minutes: i64, tz: &Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(tz);
    let minute_of_day = i64::from(local.hour()) * 60 + i64::from(local.minute());
    let over = minute_of_day % granularity_minutes;
    instant
        - Duration::minutes(over)
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()))
}

/// Enumerate free slots of `query.duration_minutes` that conflict with
/// neither `busy` nor `exclude`.
///
/// Returns at most `query.max_results` slots in ascending start order. An
/// empty result means nothing fits and is not an error.
pub fn find_slots(
    query: &SlotQuery,
    busy: &[TimeInterval],
    exclude: &[TimeInterval],
) -> Result<Vec<CandidateSlot>> {
    let (duration, step) = query.validate()?;
    if duration > query.window.duration() {
        debug!(
            "Slot duration {} min exceeds the {} min window",
            query.duration_minutes,
            query.window.duration_minutes()
        );
        return Ok(Vec::new());
    }

    let merged_busy = merge(busy);

    let mut cursor = round_down_local(
        query.window.start(),
        query.granularity_minutes,
        &query.timezone,
    );
    let mut slots = Vec::new();

    while slots.len() < query.max_results {
        let Ok(candidate) = TimeInterval::starting_at(cursor, query.duration_minutes) else {
            break;
        };
        if candidate.end() > query.window.end() {
            break;
        }

        let conflicts = merged_busy
            .iter()
            .chain(exclude.iter())
            .any(|other| candidate.overlaps(other));

        if !conflicts {
            slots.push(CandidateSlot {
                order: slots.len() + 1,
                interval: candidate,
            });
        }

        match cursor.checked_add_signed(step) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    debug!(
        "Slot search over {} .. {} ({} min) found {} slot(s)",
        query.window.start().to_rfc3339(),
        query.window.end().to_rfc3339(),
        query.duration_minutes,
        slots.len()
    );

    Ok(slots)
}
