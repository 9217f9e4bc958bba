//! parley-exchange - Email exchanges and who they belong to
//!
//! This crate provides functionality for:
//! - The append-only exchange message log persisted to SQLite
//! - Set-once exchange ownership
//! - Linking inbound mail to its thread and merging reply recipients
//! - Routing inbound mail through the engagement rules

pub mod engagement;
pub mod error;
pub mod model;
pub mod store;
pub mod thread;
pub mod users;

pub use engagement::{Classification, Engagement, EngagementClassifier, Party};
pub use error::ExchangeError;
pub use model::{
    EngagementLimits, ExchangeMessage, ExchangeSummary, MessageType, RawMessage,
    normalize_address, normalize_recipients,
};
pub use store::ExchangeStore;
pub use thread::{ResolvedMessage, ThreadResolver, merge_recipients, sanitize_body};
pub use users::{User, UserDirectory};
