//! Mail transport port
//!
//! Sends are never retried here. A retry could deliver the same email twice;
//! callers deduplicate through the transport message id instead.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MailError {
    /// Provider unreachable or failed mid-send
    #[error("mail transport failure: {0}")]
    Transport(String),

    /// Provider refused the message
    #[error("mail rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "content")]
pub enum EmailBody {
    Text(String),
    Html(String),
}

impl EmailBody {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) | Self::Html(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: EmailBody,
    /// Transport message id this email replies to
    #[serde(default)]
    pub in_reply_to: Option<String>,
}

impl OutboundEmail {
    /// Every addressee across to, cc and bcc
    pub fn all_recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .cloned()
            .collect()
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send once and return the transport message id
    async fn send(&self, email: &OutboundEmail) -> Result<String, MailError>;
}

/// Transport that keeps outbound mail in memory
pub struct RecordingTransport {
    domain: String,
    counter: AtomicU64,
    sent: Mutex<Vec<(String, OutboundEmail)>>,
}

impl RecordingTransport {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            counter: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent so far with its message id
    pub fn sent(&self) -> Vec<(String, OutboundEmail)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!("Outbox mutex was poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, MailError> {
        if email.to.is_empty() {
            return Err(MailError::Rejected("no primary recipient".into()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = format!("<outbound-{}@{}>", n, self.domain);

        info!(
            "Recorded outbound email {} to {:?} ({})",
            message_id, email.to, email.subject
        );
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((message_id.clone(), email.clone()));
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &[&str]) -> OutboundEmail {
        OutboundEmail {
            to: to.iter().map(|s| s.to_string()).collect(),
            cc: vec!["cc@x.com".into()],
            bcc: vec![],
            subject: "Hello".into(),
            body: EmailBody::Text("Hi".into()),
            in_reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_recording_transport_assigns_ids() {
        let transport = RecordingTransport::new("parley.ai");
        let first = transport.send(&email(&["a@x.com"])).await.unwrap();
        let second = transport.send(&email(&["b@x.com"])).await.unwrap();
        assert_eq!(first, "<outbound-1@parley.ai>");
        assert_ne!(first, second);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_recording_transport_rejects_empty_to() {
        let transport = RecordingTransport::new("parley.ai");
        let err = transport.send(&email(&[])).await.unwrap_err();
        assert!(matches!(err, MailError::Rejected(_)));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_all_recipients() {
        let e = email(&["a@x.com"]);
        assert_eq!(e.all_recipients(), vec!["a@x.com".to_string(), "cc@x.com".to_string()]);
        assert_eq!(EmailBody::Html("<p>x</p>".into()).as_str(), "<p>x</p>");
    }
}
