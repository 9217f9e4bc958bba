//! parley-core - The scheduling assistant's application layer
//!
//! Ties thread resolution, engagement routing and calendar availability
//! together: the tool surface the language-model agent calls, the outbound
//! email composer, and the inbound processing pipeline.

pub mod agent;
pub mod compose;
pub mod config;
pub mod mail;
pub mod processing;
pub mod tools;

pub use agent::{AcknowledgingAgent, AgentPolicy, AgentReply, AgentRequest, Flow, SchedulingAgent};
pub use config::ParleyConfig;
pub use mail::{EmailBody, MailError, MailTransport, OutboundEmail, RecordingTransport};
pub use processing::{InboundProcessor, ProcessOutcome, SentEmail};
pub use tools::{
    SchedulingContext, SchedulingServices, ToolDefinition, ToolExecutor, ToolHandler, ToolRegistry,
};
