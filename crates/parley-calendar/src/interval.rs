//! Time intervals and the busy-interval merger
//!
//! All interval math runs on absolute UTC instants. Timezones only appear at
//! the formatting and parsing edges.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalendarError, Result};

/// A span of time `[start, end)`.
///
/// `end` is never before `start`. Zero-length intervals are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for TimeInterval {
    type Error = CalendarError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(CalendarError::Validation(format!(
                "interval ends before it starts ({} > {})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Interval of `minutes` length starting at `start`
    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Result<Self> {
        let end = Duration::try_minutes(minutes)
            .and_then(|length| start.checked_add_signed(length))
            .ok_or_else(|| {
                CalendarError::Validation(format!(
                    "interval of {} minutes from {} is out of range",
                    minutes,
                    start.to_rfc3339()
                ))
            })?;
        Self::new(start, end)
    }

    /// Parse a pair of RFC 3339 timestamps
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |value: &str| {
            DateTime::parse_from_rfc3339(value.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CalendarError::Validation(format!("bad timestamp '{}': {}", value, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    /// Half-open overlap: `self.start < other.end && self.end > other.start`
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// A busy interval reported by one calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyWindow {
    pub calendar_id: String,
    pub interval: TimeInterval,
}

/// Merge overlapping or touching intervals.
///
/// The output is sorted by start. Any pair with `a.end >= b.start` collapses
/// into one interval, so back-to-back meetings become a single busy block.
pub fn merge(intervals: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|i| (i.start, i.end));

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(current) = merged.last_mut() {
            if current.end >= interval.start {
                if interval.end > current.end {
                    current.end = interval.end;
                }
                continue;
            }
        }
        merged.push(interval);
    }

    merged
}

/// Free runs inside `window` not covered by `busy`, keeping only runs of at
/// least `min_minutes`.
pub fn free_windows(
    window: &TimeInterval,
    busy: &[TimeInterval],
    min_minutes: i64,
) -> Vec<TimeInterval> {
    let mut free = Vec::new();
    let mut cursor = window.start;

    let mut push_run = |start: DateTime<Utc>, end: DateTime<Utc>| {
        if end > start && (end - start).num_minutes() >= min_minutes {
            free.push(TimeInterval { start, end });
        }
    };

    for block in merge(busy) {
        if block.end <= window.start || block.start >= window.end {
            continue;
        }
        if block.start > cursor {
            push_run(cursor, block.start);
        }
        if block.end > cursor {
            cursor = block.end;
        }
    }

    if window.end > cursor {
        push_run(cursor, window.end);
    }

    free
}
