//! Scheduling agent port and per-request policy
//!
//! The language-model agent itself lives outside this crate. Each request
//! resolves one [`AgentPolicy`] from the flow and the configuration, and the
//! agent only sees the tools that policy allows.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parley_exchange::{ExchangeMessage, User};
use tracing::debug;

use crate::config::AgentConfig;
use crate::tools::ToolRegistry;

/// Whose side of the negotiation the message comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The exchange owner wrote the message
    FirstParty,
    /// A counterparty on an owned exchange wrote the message
    ThirdParty,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstParty => "first_party",
            Self::ThirdParty => "third_party",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    File(PathBuf),
}

impl PromptSource {
    /// `@path` reads the prompt from a file, anything else is the prompt
    pub fn from_config(value: &str) -> Self {
        match value.strip_prefix('@') {
            Some(path) => Self::File(PathBuf::from(path.trim())),
            None => Self::Inline(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPolicy {
    pub flow: Flow,
    pub prompt_source: PromptSource,
    pub tool_allowlist: Vec<String>,
    pub model: String,
}

impl AgentPolicy {
    pub fn resolve(flow: Flow, config: &AgentConfig) -> Self {
        let (prompt, tools) = match flow {
            Flow::FirstParty => (&config.first_party_prompt, &config.first_party_tools),
            Flow::ThirdParty => (&config.third_party_prompt, &config.third_party_tools),
        };
        debug!(
            "Resolved {} policy: model={}, tools={:?}",
            flow.as_str(),
            config.model,
            tools
        );
        Self {
            flow,
            prompt_source: PromptSource::from_config(prompt),
            tool_allowlist: tools.clone(),
            model: config.model.clone(),
        }
    }

    pub fn system_prompt(&self) -> Result<String> {
        match &self.prompt_source {
            PromptSource::Inline(text) => Ok(text.clone()),
            PromptSource::File(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read prompt file {}", path.display())),
        }
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        self.tool_allowlist.iter().any(|t| t == tool_name)
    }
}

/// Everything the agent gets for one inbound message
pub struct AgentRequest<'a> {
    pub policy: &'a AgentPolicy,
    /// The user the agent acts for
    pub user: &'a User,
    /// Stored messages of the exchange, oldest first, including `message`
    pub history: &'a [ExchangeMessage],
    pub message: &'a ExchangeMessage,
    pub tools: &'a ToolRegistry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub body: String,
}

#[async_trait]
pub trait SchedulingAgent: Send + Sync {
    async fn run(&self, request: AgentRequest<'_>) -> Result<AgentReply>;
}

/// Agent that never calls tools and only confirms receipt
pub struct AcknowledgingAgent {
    assistant_name: String,
}

impl AcknowledgingAgent {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }
}

#[async_trait]
impl SchedulingAgent for AcknowledgingAgent {
    async fn run(&self, request: AgentRequest<'_>) -> Result<AgentReply> {
        debug!(
            "Acknowledging {} for {} with {} tools available",
            request.message.message_id,
            request.user.email,
            request.tools.len()
        );
        Ok(AgentReply {
            body: format!(
                "Hi,\n\nThanks, I've received your message and I'm working on it on behalf of {}.\n\n{}",
                request.user.display_name(),
                self.assistant_name
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_exchange::MessageType;
    use uuid::Uuid;

    #[test]
    fn test_policy_per_flow() {
        let config = AgentConfig::default();
        let first = AgentPolicy::resolve(Flow::FirstParty, &config);
        let third = AgentPolicy::resolve(Flow::ThirdParty, &config);

        assert!(first.allows("request_scheduling_over_email"));
        assert!(!third.allows("request_scheduling_over_email"));
        assert!(third.allows("find_bookable_slots"));
        assert_eq!(first.model, config.model);
        assert_eq!(
            third.system_prompt().unwrap(),
            config.third_party_prompt
        );
    }

    #[test]
    fn test_prompt_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "Be brief.").unwrap();

        let config = AgentConfig {
            first_party_prompt: format!("@{}", path.display()),
            ..AgentConfig::default()
        };
        let policy = AgentPolicy::resolve(Flow::FirstParty, &config);
        assert_eq!(policy.prompt_source, PromptSource::File(path));
        assert_eq!(policy.system_prompt().unwrap(), "Be brief.");
    }

    #[test]
    fn test_missing_prompt_file_errors() {
        let policy = AgentPolicy {
            flow: Flow::ThirdParty,
            prompt_source: PromptSource::File(PathBuf::from("/nonexistent/prompt.md")),
            tool_allowlist: vec![],
            model: "m".into(),
        };
        assert!(policy.system_prompt().is_err());
    }

    #[tokio::test]
    async fn test_acknowledging_agent() {
        let user = User {
            id: "u1".into(),
            email: "ana@example.com".into(),
            name: "Ana".into(),
            timezone: "UTC".into(),
        };
        let message = ExchangeMessage {
            id: Uuid::new_v4(),
            exchange_id: Uuid::new_v4(),
            exchange_owner_id: None,
            message_id: "<m1@x>".into(),
            previous_message_id: None,
            sender: "ana@example.com".into(),
            recipients: vec![],
            subject: "Lunch".into(),
            body: "Lunch?".into(),
            timestamp: Utc::now(),
            message_type: MessageType::Inbound,
        };
        let policy = AgentPolicy::resolve(Flow::FirstParty, &AgentConfig::default());
        let tools = ToolRegistry::new();
        let reply = AcknowledgingAgent::new("Parley")
            .run(AgentRequest {
                policy: &policy,
                user: &user,
                history: std::slice::from_ref(&message),
                message: &message,
                tools: &tools,
            })
            .await
            .unwrap();
        assert!(reply.body.contains("on behalf of Ana"));
        assert!(reply.body.ends_with("Parley"));
    }
}
