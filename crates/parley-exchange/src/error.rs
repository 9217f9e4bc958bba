use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// A message with this transport id is already stored
    #[error("message {0} is already recorded")]
    DuplicateMessage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database task panicked: {0}")]
    TaskPanicked(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
