//! Exchange message types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a message relative to the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Inbound,
    Outbound,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One email in an exchange. Stored append-only; only `exchange_owner_id`
/// is ever written after creation, and only once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeMessage {
    pub id: Uuid,
    pub exchange_id: Uuid,
    pub exchange_owner_id: Option<String>,
    /// Transport message id (unique)
    pub message_id: String,
    pub previous_message_id: Option<String>,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    /// When the email was written, not when it was stored
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
}

impl ExchangeMessage {
    /// Outbound reply to `parent` in the same exchange
    pub fn outbound_reply(
        parent: &ExchangeMessage,
        message_id: String,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange_id: parent.exchange_id,
            exchange_owner_id: parent.exchange_owner_id.clone(),
            message_id,
            previous_message_id: Some(parent.message_id.clone()),
            sender: normalize_address(sender),
            recipients: normalize_recipients(recipients),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp,
            message_type: MessageType::Outbound,
        }
    }

    /// Outbound message opening a new exchange
    pub fn outbound_new(
        message_id: String,
        owner: Option<String>,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange_id: Uuid::new_v4(),
            exchange_owner_id: owner,
            message_id,
            previous_message_id: None,
            sender: normalize_address(sender),
            recipients: normalize_recipients(recipients),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp,
            message_type: MessageType::Outbound,
        }
    }
}

/// Inbound email as handed over by the mail transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub message_id: String,
    #[serde(default)]
    pub previous_message_id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub raw_subject: String,
    #[serde(default)]
    pub raw_body: String,
    pub timestamp: DateTime<Utc>,
}

/// Thread size and age limits for continuing an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementLimits {
    /// Largest message count that is still valid
    pub max_messages: usize,
    /// Oldest first-message age that is still valid (inclusive)
    pub max_age: Duration,
}

impl Default for EngagementLimits {
    fn default() -> Self {
        Self {
            max_messages: 25,
            max_age: Duration::days(30),
        }
    }
}

/// Per-exchange rollup for inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSummary {
    pub exchange_id: Uuid,
    pub owner_id: Option<String>,
    pub message_count: usize,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
}

/// Lowercase, trim, and strip a display name (`Ana <ana@x.com>` -> `ana@x.com`)
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let addr = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed,
    };
    addr.trim().trim_matches('"').to_lowercase()
}

/// Normalize and deduplicate, keeping first-seen order and dropping blanks
pub fn normalize_recipients<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(raw.len());
    for r in raw {
        let addr = normalize_address(r.as_ref());
        if !addr.is_empty() && !seen.contains(&addr) {
            seen.push(addr);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  Ana@Example.COM "), "ana@example.com");
        assert_eq!(
            normalize_address("\"Ana Lopez\" <Ana@Example.com>"),
            "ana@example.com"
        );
        assert_eq!(normalize_address("weird> <x@y.z"), "weird> <x@y.z");
    }

    #[test]
    fn test_normalize_recipients_dedups_in_order() {
        let out = normalize_recipients(&["B@x.com", "a@x.com", "b@X.com", " ", "Ana <a@x.com>"]);
        assert_eq!(out, vec!["b@x.com".to_string(), "a@x.com".to_string()]);
    }

    #[test]
    fn test_message_type_round_trip() {
        assert_eq!(MessageType::parse("inbound"), Some(MessageType::Inbound));
        assert_eq!(MessageType::parse(MessageType::Outbound.as_str()), Some(MessageType::Outbound));
        assert_eq!(MessageType::parse("sideways"), None);
    }

    #[test]
    fn test_raw_message_defaults() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"message_id":"<m1@x>","sender":"a@x.com","timestamp":"2024-03-05T09:00:00Z"}"#,
        )
        .unwrap();
        assert!(raw.previous_message_id.is_none());
        assert!(raw.recipients.is_empty());
        assert_eq!(raw.raw_body, "");
    }

    #[test]
    fn test_outbound_reply_inherits_thread() {
        let parent = ExchangeMessage {
            id: Uuid::new_v4(),
            exchange_id: Uuid::new_v4(),
            exchange_owner_id: Some("owner@x.com".into()),
            message_id: "<m1@x>".into(),
            previous_message_id: None,
            sender: "a@x.com".into(),
            recipients: vec![],
            subject: "Lunch".into(),
            body: String::new(),
            timestamp: Utc::now(),
            message_type: MessageType::Inbound,
        };
        let reply = ExchangeMessage::outbound_reply(
            &parent,
            "<m2@x>".into(),
            "Assistant <ASSIST@parley.ai>",
            &["A@x.com".to_string()],
            "Re: Lunch",
            "Sure",
            Utc::now(),
        );
        assert_eq!(reply.exchange_id, parent.exchange_id);
        assert_eq!(reply.exchange_owner_id, parent.exchange_owner_id);
        assert_eq!(reply.previous_message_id.as_deref(), Some("<m1@x>"));
        assert_eq!(reply.sender, "assist@parley.ai");
        assert_eq!(reply.message_type, MessageType::Outbound);
    }
}
