//! System users the assistant acts for

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::ExchangeStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Normalized address; also the exchange owner id
    pub email: String,
    pub name: String,
    /// IANA timezone name
    pub timezone: String,
}

impl User {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Lookup of recognized system users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
}

#[async_trait]
impl UserDirectory for ExchangeStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_by_email(email).await
    }
}
