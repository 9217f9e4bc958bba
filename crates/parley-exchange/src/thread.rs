//! Linking inbound mail to its exchange
//!
//! A message continues an exchange only when its in-reply-to reference
//! resolves to a stored message. Anything else opens a new exchange.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    ExchangeMessage, MessageType, RawMessage, normalize_address, normalize_recipients,
};
use crate::store::ExchangeStore;

pub const DEFAULT_MAX_BODY_CHARS: usize = 1000;

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Collapse line breaks and whitespace runs to single spaces, then cut to
/// `max_chars` characters.
pub fn sanitize_body(text: &str, max_chars: usize) -> String {
    let flattened = text.replace("\r\n", " ").replace(['\r', '\n'], " ");
    let collapsed = whitespace_runs().replace_all(flattened.trim(), " ");
    collapsed.chars().take(max_chars).collect()
}

fn attribute(sender: &str, timestamp: &DateTime<Utc>, body: &str) -> String {
    format!(
        "{} wrote at {}: {}",
        sender,
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        body
    )
}

fn is_own_domain(address: &str, own_domain: &str) -> bool {
    let domain = own_domain.trim().trim_start_matches('@').to_lowercase();
    !domain.is_empty()
        && address
            .rsplit_once('@')
            .is_some_and(|(_, d)| d.eq_ignore_ascii_case(&domain))
}

/// Recipients for a reply: previous and current recipients deduplicated in
/// first-seen order, minus the triggering sender and any own-domain address.
pub fn merge_recipients(
    previous: &[String],
    current: &[String],
    sender: &str,
    own_domain: &str,
) -> Vec<String> {
    let sender = normalize_address(sender);
    let all: Vec<&String> = previous.iter().chain(current.iter()).collect();
    normalize_recipients(&all)
        .into_iter()
        .filter(|addr| *addr != sender && !is_own_domain(addr, own_domain))
        .collect()
}

/// An inbound message attached to its exchange, not yet persisted
#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    pub message: ExchangeMessage,
    /// The stored message this one replies to, if it resolved
    pub previous: Option<ExchangeMessage>,
}

impl ResolvedMessage {
    pub fn is_new_exchange(&self) -> bool {
        self.previous.is_none()
    }

    /// Reply recipients per [`merge_recipients`]
    pub fn reply_recipients(&self, own_domain: &str) -> Vec<String> {
        let previous = self
            .previous
            .as_ref()
            .map(|p| p.recipients.as_slice())
            .unwrap_or(&[]);
        merge_recipients(
            previous,
            &self.message.recipients,
            &self.message.sender,
            own_domain,
        )
    }
}

pub struct ThreadResolver {
    store: Arc<ExchangeStore>,
    max_body_chars: usize,
}

impl ThreadResolver {
    pub fn new(store: Arc<ExchangeStore>) -> Self {
        Self {
            store,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }

    pub fn with_max_body_chars(mut self, max_body_chars: usize) -> Self {
        self.max_body_chars = max_body_chars;
        self
    }

    async fn fresh_exchange_id(&self) -> Result<Uuid> {
        loop {
            let candidate = Uuid::new_v4();
            if !self.store.exchange_exists(candidate).await? {
                return Ok(candidate);
            }
        }
    }

    pub async fn resolve_thread(&self, raw: &RawMessage) -> Result<ResolvedMessage> {
        let previous = match raw
            .previous_message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(id) => {
                let found = self.store.get_by_message_id(id).await?;
                if found.is_none() {
                    debug!(
                        "In-reply-to {} of {} is unknown, starting a new exchange",
                        id, raw.message_id
                    );
                }
                found
            }
            None => None,
        };

        let (exchange_id, exchange_owner_id) = match &previous {
            Some(prev) => {
                let owner = match &prev.exchange_owner_id {
                    Some(owner) => Some(owner.clone()),
                    None => self.store.get_exchange_owner(prev.exchange_id).await?,
                };
                (prev.exchange_id, owner)
            }
            None => (self.fresh_exchange_id().await?, None),
        };

        let sender = normalize_address(&raw.sender);
        let body = sanitize_body(
            &attribute(&sender, &raw.timestamp, &raw.raw_body),
            self.max_body_chars,
        );

        let message = ExchangeMessage {
            id: Uuid::new_v4(),
            exchange_id,
            exchange_owner_id,
            message_id: raw.message_id.trim().to_string(),
            previous_message_id: raw.previous_message_id.clone(),
            sender,
            recipients: normalize_recipients(&raw.recipients),
            subject: sanitize_body(&raw.raw_subject, usize::MAX),
            body,
            timestamp: raw.timestamp,
            message_type: MessageType::Inbound,
        };

        Ok(ResolvedMessage { message, previous })
    }
}
