//! Engagement routing for inbound mail
//!
//! Every inbound message lands on exactly one route:
//!
//! | sender        | exchange owner | first msg or valid | route                         |
//! |---------------|----------------|--------------------|-------------------------------|
//! | not a user    | none           | -                  | `NewUser`                     |
//! | user          | any            | yes                | `ExistingUserContinuing`      |
//! | user          | any            | no                 | `InvalidReengagement(User)`   |
//! | not a user    | some           | valid              | `NonUserContinuing`           |
//! | not a user    | some           | not valid          | `InvalidReengagement(NonUser)`|
//!
//! The classifier expects the inbound message to be stored already so the
//! count and first-message checks include it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::store::ExchangeStore;
use crate::thread::ResolvedMessage;
use crate::users::{User, UserDirectory};

/// Who sent a message on a thread that can no longer be engaged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    ExistingUser,
    NonUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    NewUser,
    ExistingUserContinuing,
    NonUserContinuing,
    InvalidReengagement(Party),
}

impl Engagement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewUser => "new_user",
            Self::ExistingUserContinuing => "existing_user_continuing",
            Self::NonUserContinuing => "non_user_continuing",
            Self::InvalidReengagement(Party::ExistingUser) => "invalid_reengagement_user",
            Self::InvalidReengagement(Party::NonUser) => "invalid_reengagement_non_user",
        }
    }

    /// Whether this route hands the message to the scheduling agent
    pub fn invokes_agent(&self) -> bool {
        matches!(self, Self::ExistingUserContinuing | Self::NonUserContinuing)
    }
}

impl std::fmt::Display for Engagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route plus the facts it was derived from
#[derive(Debug, Clone)]
pub struct Classification {
    pub route: Engagement,
    /// The sender, when it is a recognized user
    pub sender_user: Option<User>,
    /// The exchange owner at classification time
    pub owner_id: Option<String>,
}

pub struct EngagementClassifier {
    store: Arc<ExchangeStore>,
    users: Arc<dyn UserDirectory>,
}

impl EngagementClassifier {
    pub fn new(store: Arc<ExchangeStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    pub async fn classify(&self, resolved: &ResolvedMessage) -> Result<Classification> {
        self.classify_at(resolved, Utc::now()).await
    }

    /// Classify against `now`; validity is re-evaluated on every call
    pub async fn classify_at(
        &self,
        resolved: &ResolvedMessage,
        now: DateTime<Utc>,
    ) -> Result<Classification> {
        let message = &resolved.message;
        let sender_user = self.users.find_by_email(&message.sender).await?;

        let owner_id = match &message.exchange_owner_id {
            Some(owner) => Some(owner.clone()),
            None => self.store.get_exchange_owner(message.exchange_id).await?,
        };

        let route = match (&sender_user, &owner_id) {
            (None, None) => Engagement::NewUser,
            (Some(_), _) => {
                let continuing = self.store.is_first_message_in_exchange(message).await?
                    || self.store.is_valid_engagement_at(message, now).await?;
                if continuing {
                    Engagement::ExistingUserContinuing
                } else {
                    Engagement::InvalidReengagement(Party::ExistingUser)
                }
            }
            (None, Some(_)) => {
                if self.store.is_valid_engagement_at(message, now).await? {
                    Engagement::NonUserContinuing
                } else {
                    Engagement::InvalidReengagement(Party::NonUser)
                }
            }
        };

        info!(
            "Message {} in exchange {} routed to {}",
            message.message_id, message.exchange_id, route
        );

        Ok(Classification {
            route,
            sender_user,
            owner_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawMessage;
    use crate::thread::ThreadResolver;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        store: Arc<ExchangeStore>,
        resolver: ThreadResolver,
        classifier: EngagementClassifier,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(ExchangeStore::open_in_memory().unwrap());
        store
            .upsert_user("ana@example.com", "Ana", "UTC")
            .await
            .unwrap();
        Fixture {
            resolver: ThreadResolver::new(store.clone()),
            classifier: EngagementClassifier::new(store.clone(), store.clone()),
            store,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn raw(id: &str, previous: Option<&str>, sender: &str, ts: DateTime<Utc>) -> RawMessage {
        RawMessage {
            message_id: id.to_string(),
            previous_message_id: previous.map(String::from),
            sender: sender.to_string(),
            recipients: vec!["assistant@parley.ai".into()],
            raw_subject: "Meeting".into(),
            raw_body: "Can we meet?".into(),
            timestamp: ts,
        }
    }

    impl Fixture {
        /// Resolve, store, classify
        async fn receive(&self, raw: RawMessage, now: DateTime<Utc>) -> Classification {
            let resolved = self.resolver.resolve_thread(&raw).await.unwrap();
            self.store.insert(&resolved.message).await.unwrap();
            self.classifier.classify_at(&resolved, now).await.unwrap()
        }

        async fn own(&self, message_id: &str, owner: &str) {
            let m = self.store.get_by_message_id(message_id).await.unwrap().unwrap();
            self.store
                .associate_exchange_with_user(m.exchange_id, owner)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_unknown_sender_new_thread_is_new_user() {
        let f = fixture().await;
        let c = f.receive(raw("<m1@x>", None, "stranger@x.com", t0()), t0()).await;
        assert_eq!(c.route, Engagement::NewUser);
        assert!(c.sender_user.is_none());
        assert!(!c.route.invokes_agent());
    }

    #[tokio::test]
    async fn test_user_first_message_continues() {
        let f = fixture().await;
        let c = f.receive(raw("<m1@x>", None, "Ana@Example.com", t0()), t0()).await;
        assert_eq!(c.route, Engagement::ExistingUserContinuing);
        assert_eq!(c.sender_user.unwrap().email, "ana@example.com");
    }

    #[tokio::test]
    async fn test_non_user_reply_on_owned_thread() {
        let f = fixture().await;
        f.receive(raw("<m1@x>", None, "ana@example.com", t0()), t0()).await;
        f.own("<m1@x>", "ana@example.com").await;

        let later = t0() + Duration::hours(2);
        let c = f
            .receive(raw("<m2@x>", Some("<m1@x>"), "bob@x.com", later), later)
            .await;
        assert_eq!(c.route, Engagement::NonUserContinuing);
        assert_eq!(c.owner_id.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn test_stale_thread_for_non_user() {
        let f = fixture().await;
        f.receive(raw("<m1@x>", None, "ana@example.com", t0()), t0()).await;
        f.own("<m1@x>", "ana@example.com").await;

        let late = t0() + Duration::days(31);
        let c = f
            .receive(raw("<m2@x>", Some("<m1@x>"), "bob@x.com", late), late)
            .await;
        assert_eq!(c.route, Engagement::InvalidReengagement(Party::NonUser));
    }

    #[tokio::test]
    async fn test_stale_thread_for_user() {
        let f = fixture().await;
        f.receive(raw("<m1@x>", None, "bob@x.com", t0()), t0()).await;
        f.own("<m1@x>", "ana@example.com").await;

        let late = t0() + Duration::days(31);
        let c = f
            .receive(raw("<m2@x>", Some("<m1@x>"), "ana@example.com", late), late)
            .await;
        assert_eq!(c.route, Engagement::InvalidReengagement(Party::ExistingUser));
        assert!(!c.route.invokes_agent());
    }

    #[tokio::test]
    async fn test_validity_is_evaluated_fresh() {
        let f = fixture().await;
        f.receive(raw("<m1@x>", None, "bob@x.com", t0()), t0()).await;
        f.own("<m1@x>", "ana@example.com").await;

        let resolved = f
            .resolver
            .resolve_thread(&raw("<m2@x>", Some("<m1@x>"), "carol@x.com", t0()))
            .await
            .unwrap();
        f.store.insert(&resolved.message).await.unwrap();

        let early = f
            .classifier
            .classify_at(&resolved, t0() + Duration::days(30))
            .await
            .unwrap();
        assert_eq!(early.route, Engagement::NonUserContinuing);

        let late = f
            .classifier
            .classify_at(&resolved, t0() + Duration::days(30) + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(late.route, Engagement::InvalidReengagement(Party::NonUser));
    }

    #[tokio::test]
    async fn test_unknown_reference_from_stranger_is_new_user() {
        let f = fixture().await;
        f.receive(raw("<m1@x>", None, "ana@example.com", t0()), t0()).await;
        f.own("<m1@x>", "ana@example.com").await;

        let c = f
            .receive(raw("<m2@x>", Some("<lost@x>"), "bob@x.com", t0()), t0())
            .await;
        assert_eq!(c.route, Engagement::NewUser);
    }

    #[test]
    fn test_route_names() {
        assert_eq!(Engagement::NewUser.to_string(), "new_user");
        assert_eq!(
            Engagement::InvalidReengagement(Party::NonUser).as_str(),
            "invalid_reengagement_non_user"
        );
    }
}
