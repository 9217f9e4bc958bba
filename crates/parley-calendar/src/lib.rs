//! parley-calendar - Free/busy math for the scheduling assistant
//!
//! This crate provides:
//! - Validated time intervals and the busy-interval merger
//! - The fixed-granularity slot finder
//! - The calendar provider port and the multi-account availability aggregator
//! - A JSON fixture provider for offline use

pub mod availability;
pub mod error;
pub mod fixture;
pub mod interval;
pub mod provider;
pub mod slot;

pub use availability::{
    AccountFailure, AvailabilityAggregator, AvailabilityOptions, AvailabilityReport, SlotSearch,
};
pub use error::{CalendarError, parse_timezone};
pub use fixture::FixtureCalendarProvider;
pub use interval::{BusyWindow, TimeInterval, free_windows, merge};
pub use provider::{CalendarConnection, CalendarEvent, CalendarProvider, EventDraft};
pub use slot::{CandidateSlot, SlotQuery, find_slots};
