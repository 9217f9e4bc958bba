//! Inbound mail pipeline
//!
//! duplicate guard -> thread resolution -> persist -> classify -> route.
//! Every route ends in at least one outbound email, and every outbound email
//! is stored on its exchange after it is sent.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parley_exchange::{
    Engagement, EngagementClassifier, ExchangeError, ExchangeMessage, ExchangeStore, RawMessage,
    ResolvedMessage, ThreadResolver, User, UserDirectory,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentPolicy, AgentRequest, Flow, SchedulingAgent};
use crate::compose;
use crate::mail::{EmailBody, OutboundEmail};
use crate::tools::{SchedulingContext, SchedulingServices, ToolRegistry, scheduling_tools};

/// One email sent while handling an inbound message
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub message_id: String,
    pub email: OutboundEmail,
    /// Exchange the email was stored on, if storing succeeded
    pub exchange_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The message id was already stored; nothing was sent
    Duplicate { message_id: String },
    Handled {
        route: Engagement,
        exchange_id: Uuid,
        sent: Vec<SentEmail>,
    },
}

pub struct InboundProcessor {
    services: Arc<SchedulingServices>,
    resolver: ThreadResolver,
    classifier: EngagementClassifier,
    users: Arc<dyn UserDirectory>,
    agent: Arc<dyn SchedulingAgent>,
}

impl InboundProcessor {
    pub fn new(
        services: Arc<SchedulingServices>,
        users: Arc<dyn UserDirectory>,
        agent: Arc<dyn SchedulingAgent>,
    ) -> Self {
        let store = services.store.clone();
        let resolver = ThreadResolver::new(store.clone())
            .with_max_body_chars(services.config.engagement.max_body_chars);
        Self {
            classifier: EngagementClassifier::new(store, users.clone()),
            resolver,
            services,
            users,
            agent,
        }
    }

    fn store(&self) -> &ExchangeStore {
        &self.services.store
    }

    pub async fn process(&self, raw: &RawMessage) -> Result<ProcessOutcome> {
        self.process_at(raw, Utc::now()).await
    }

    /// Handle one inbound message with `now` as the evaluation instant
    pub async fn process_at(
        &self,
        raw: &RawMessage,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        let message_id = raw.message_id.trim().to_string();
        if self.store().get_by_message_id(&message_id).await?.is_some() {
            info!("Ignoring duplicate delivery of {}", message_id);
            return Ok(ProcessOutcome::Duplicate { message_id });
        }

        let mut resolved = self
            .resolver
            .resolve_thread(raw)
            .await
            .context("Failed to resolve thread")?;
        resolved.message = match self.store().insert(&resolved.message).await {
            Ok(stored) => stored,
            Err(ExchangeError::DuplicateMessage(id)) => {
                info!("Lost insert race for {}, treating as duplicate", id);
                return Ok(ProcessOutcome::Duplicate { message_id: id });
            }
            Err(e) => return Err(e).context("Failed to store inbound message"),
        };

        let classification = self
            .classifier
            .classify_at(&resolved, now)
            .await
            .context("Failed to classify inbound message")?;

        let sent = match classification.route {
            Engagement::NewUser => self.onboard(&resolved, now).await?,
            Engagement::ExistingUserContinuing => {
                let user = classification
                    .sender_user
                    .context("Existing-user route without a sender user")?;
                self.services
                    .store
                    .associate_exchange_with_user(resolved.message.exchange_id, &user.email)
                    .await?;
                self.run_agent(Flow::FirstParty, user, &resolved, now)
                    .await?
            }
            Engagement::NonUserContinuing => {
                let owner_id = classification
                    .owner_id
                    .context("Non-user route without an exchange owner")?;
                let owner = self.owner_user(&owner_id).await?;
                self.run_agent(Flow::ThirdParty, owner, &resolved, now)
                    .await?
            }
            Engagement::InvalidReengagement(_) => {
                let body = compose::stale_thread_notice(
                    &self.services.config.assistant.name,
                    &self.store().limits(),
                );
                vec![self.reply(&resolved, Vec::new(), body, now).await?]
            }
        };

        Ok(ProcessOutcome::Handled {
            route: classification.route,
            exchange_id: resolved.message.exchange_id,
            sent,
        })
    }

    /// Owner record for the third-party flow; owners that are no longer
    /// registered get a minimal record so the thread is still answered
    async fn owner_user(&self, owner_id: &str) -> Result<User> {
        if let Some(user) = self.users.find_by_email(owner_id).await? {
            return Ok(user);
        }
        warn!("Exchange owner {} is not a registered user", owner_id);
        Ok(User {
            id: owner_id.to_string(),
            email: owner_id.to_string(),
            name: String::new(),
            timezone: self.services.config.slots.default_timezone.clone(),
        })
    }

    async fn onboard(
        &self,
        resolved: &ResolvedMessage,
        now: DateTime<Utc>,
    ) -> Result<Vec<SentEmail>> {
        let assistant = &self.services.config.assistant;
        let ack = self
            .reply(resolved, Vec::new(), compose::onboarding_ack(&assistant.name), now)
            .await?;

        let (subject, body) = compose::onboarding_welcome(&assistant.name, &assistant.address);
        let welcome = OutboundEmail {
            to: vec![resolved.message.sender.clone()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject,
            body: EmailBody::Text(body),
            in_reply_to: None,
        };
        let welcome = self.send_and_store(welcome, None, now).await?;
        Ok(vec![ack, welcome])
    }

    async fn run_agent(
        &self,
        flow: Flow,
        user: User,
        resolved: &ResolvedMessage,
        now: DateTime<Utc>,
    ) -> Result<Vec<SentEmail>> {
        let config = &self.services.config;
        let policy = AgentPolicy::resolve(flow, &config.agent);
        let context = Arc::new(SchedulingContext::for_user(user, config));
        let tools = ToolRegistry::with_allowlist(
            scheduling_tools(self.services.clone(), context.clone()),
            &policy.tool_allowlist,
        );
        let history = self
            .store()
            .get_all_messages_in_exchange(resolved.message.exchange_id)
            .await?;

        let outcome = self
            .agent
            .run(AgentRequest {
                policy: &policy,
                user: &context.user,
                history: &history,
                message: &resolved.message,
                tools: &tools,
            })
            .await;

        let body = match outcome {
            Ok(reply) => reply.body,
            Err(e) => {
                warn!(
                    "Agent failed on {} ({} flow): {:#}",
                    resolved.message.message_id,
                    flow.as_str(),
                    e
                );
                compose::agent_failure_notice(&config.assistant.name)
            }
        };

        let cc = resolved.reply_recipients(&config.assistant.own_domain);
        Ok(vec![self.reply(resolved, cc, body, now).await?])
    }

    /// Reply to the sender on the same exchange
    async fn reply(
        &self,
        resolved: &ResolvedMessage,
        cc: Vec<String>,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<SentEmail> {
        let inbound = &resolved.message;
        let email = OutboundEmail {
            to: vec![inbound.sender.clone()],
            cc,
            bcc: Vec::new(),
            subject: compose::reply_subject(&inbound.subject),
            body: EmailBody::Text(body),
            in_reply_to: Some(inbound.message_id.clone()),
        };
        self.send_and_store(email, Some(inbound), now).await
    }

    /// Send once, then store the email as an outbound message.
    ///
    /// Send failures propagate and are not retried. A storage failure after a
    /// successful send is logged only.
    async fn send_and_store(
        &self,
        email: OutboundEmail,
        parent: Option<&ExchangeMessage>,
        now: DateTime<Utc>,
    ) -> Result<SentEmail> {
        let message_id = self
            .services
            .mail
            .send(&email)
            .await
            .with_context(|| format!("Failed to send '{}' to {:?}", email.subject, email.to))?;
        info!("Sent {} to {:?}: {}", message_id, email.to, email.subject);

        let sender = &self.services.config.assistant.address;
        let recipients = email.all_recipients();
        let message = match parent {
            Some(parent) => ExchangeMessage::outbound_reply(
                parent,
                message_id.clone(),
                sender,
                &recipients,
                &email.subject,
                email.body.as_str(),
                now,
            ),
            None => ExchangeMessage::outbound_new(
                message_id.clone(),
                None,
                sender,
                &recipients,
                &email.subject,
                email.body.as_str(),
                now,
            ),
        };

        let exchange_id = match self.store().insert(&message).await {
            Ok(stored) => Some(stored.exchange_id),
            Err(e) => {
                error!("Sent {} but failed to store it: {}", message_id, e);
                None
            }
        };

        Ok(SentEmail {
            message_id,
            email,
            exchange_id,
        })
    }
}
