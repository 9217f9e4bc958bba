//! SQLite persistence for exchange messages, ownership, and users

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ExchangeError, Result};
use crate::model::{EngagementLimits, ExchangeMessage, ExchangeSummary, MessageType};
use crate::users::User;

const MESSAGE_COLUMNS: &str = "id, exchange_id, exchange_owner_id, message_id, previous_message_id,
     sender, recipients, subject, body, timestamp, message_type";

/// Fixed-width UTC encoding so lexical order equals time order
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(value: &str) -> Result<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .map_err(|e| ExchangeError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn decode_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ExchangeError::Corrupt(format!("bad uuid '{}': {}", value, e)))
}

/// Raw column values, decoded outside the rusqlite row callback
struct MessageRow {
    id: String,
    exchange_id: String,
    exchange_owner_id: Option<String>,
    message_id: String,
    previous_message_id: Option<String>,
    sender: String,
    recipients: String,
    subject: String,
    body: String,
    timestamp: String,
    message_type: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            exchange_id: row.get(1)?,
            exchange_owner_id: row.get(2)?,
            message_id: row.get(3)?,
            previous_message_id: row.get(4)?,
            sender: row.get(5)?,
            recipients: row.get(6)?,
            subject: row.get(7)?,
            body: row.get(8)?,
            timestamp: row.get(9)?,
            message_type: row.get(10)?,
        })
    }

    fn decode(self) -> Result<ExchangeMessage> {
        Ok(ExchangeMessage {
            id: decode_uuid(&self.id)?,
            exchange_id: decode_uuid(&self.exchange_id)?,
            exchange_owner_id: self.exchange_owner_id,
            message_id: self.message_id,
            previous_message_id: self.previous_message_id,
            sender: self.sender,
            recipients: serde_json::from_str(&self.recipients)?,
            subject: self.subject,
            body: self.body,
            timestamp: decode_ts(&self.timestamp)?,
            message_type: MessageType::parse(&self.message_type).ok_or_else(|| {
                ExchangeError::Corrupt(format!("bad message type '{}'", self.message_type))
            })?,
        })
    }
}

/// Exchange store (thread-safe via Arc<Mutex>)
///
/// Messages are append-only and keyed by transport `message_id`. Exchange
/// ownership lives in its own table so the first owner wins atomically.
pub struct ExchangeStore {
    conn: Arc<Mutex<Connection>>,
    limits: EngagementLimits,
}

impl ExchangeStore {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Initializing exchange database at {:?}", path.as_ref());
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS exchange_data (
                id TEXT PRIMARY KEY,
                exchange_id TEXT NOT NULL,
                exchange_owner_id TEXT,
                message_id TEXT NOT NULL UNIQUE,
                previous_message_id TEXT,
                sender TEXT NOT NULL,
                recipients TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                message_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS exchange_owners (
                exchange_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                assigned_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                timezone TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exchange_data_exchange
                ON exchange_data(exchange_id, timestamp);",
        )?;

        debug!("Exchange schema initialized successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            limits: EngagementLimits::default(),
        })
    }

    pub fn with_limits(mut self, limits: EngagementLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> EngagementLimits {
        self.limits
    }

    fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| {
            warn!("Database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&conn);
            f(&mut guard)
        })
        .await?
    }

    /// Append a message.
    ///
    /// If the exchange already has an owner the stored row takes that owner;
    /// if it has none and the message carries one, that owner is claimed for
    /// the exchange. Returns the message as stored.
    pub async fn insert(&self, message: &ExchangeMessage) -> Result<ExchangeMessage> {
        let mut message = message.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exchange_id = message.exchange_id.to_string();
            let now = encode_ts(&Utc::now());

            if let Some(owner) = &message.exchange_owner_id {
                tx.execute(
                    "INSERT OR IGNORE INTO exchange_owners (exchange_id, owner_id, assigned_at)
                     VALUES (?1, ?2, ?3)",
                    params![&exchange_id, owner, &now],
                )?;
            }
            message.exchange_owner_id = tx
                .query_row(
                    "SELECT owner_id FROM exchange_owners WHERE exchange_id = ?1",
                    params![&exchange_id],
                    |row| row.get(0),
                )
                .optional()?;

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO exchange_data
                    (id, exchange_id, exchange_owner_id, message_id, previous_message_id,
                     sender, recipients, subject, body, timestamp, message_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    message.id.to_string(),
                    &exchange_id,
                    &message.exchange_owner_id,
                    &message.message_id,
                    &message.previous_message_id,
                    &message.sender,
                    serde_json::to_string(&message.recipients)?,
                    &message.subject,
                    &message.body,
                    encode_ts(&message.timestamp),
                    message.message_type.as_str(),
                    &now,
                ],
            )?;
            if inserted == 0 {
                return Err(ExchangeError::DuplicateMessage(message.message_id.clone()));
            }

            tx.commit()?;
            debug!(
                "Stored {} message {} in exchange {}",
                message.message_type, message.message_id, exchange_id
            );
            Ok(message)
        })
        .await
    }

    /// Exact lookup by transport message id
    pub async fn get_by_message_id(&self, message_id: &str) -> Result<Option<ExchangeMessage>> {
        let message_id = message_id.to_owned();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM exchange_data WHERE message_id = ?1", MESSAGE_COLUMNS),
                    params![&message_id],
                    MessageRow::from_row,
                )
                .optional()?;
            row.map(MessageRow::decode).transpose()
        })
        .await
    }

    /// All messages of an exchange, oldest first
    pub async fn get_all_messages_in_exchange(
        &self,
        exchange_id: Uuid,
    ) -> Result<Vec<ExchangeMessage>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM exchange_data WHERE exchange_id = ?1
                 ORDER BY timestamp ASC, rowid ASC",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![exchange_id.to_string()], MessageRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(MessageRow::decode).collect()
        })
        .await
    }

    pub async fn exchange_exists(&self, exchange_id: Uuid) -> Result<bool> {
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM exchange_data WHERE exchange_id = ?1 LIMIT 1",
                    params![exchange_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// True iff `message` is the earliest message of its exchange
    pub async fn is_first_message_in_exchange(&self, message: &ExchangeMessage) -> Result<bool> {
        let exchange_id = message.exchange_id.to_string();
        let id = message.id.to_string();
        self.with_conn(move |conn| {
            let first: Option<String> = conn
                .query_row(
                    "SELECT id FROM exchange_data WHERE exchange_id = ?1
                     ORDER BY timestamp ASC, rowid ASC LIMIT 1",
                    params![&exchange_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(first.as_deref() == Some(id.as_str()))
        })
        .await
    }

    /// Whether the exchange of `message` may still be engaged, judged now
    pub async fn is_valid_engagement(&self, message: &ExchangeMessage) -> Result<bool> {
        self.is_valid_engagement_at(message, Utc::now()).await
    }

    /// Whether the exchange of `message` may still be engaged at `now`.
    ///
    /// Invalid when it holds more than `max_messages` messages or its first
    /// message is older than `max_age`. Both limits are inclusive.
    pub async fn is_valid_engagement_at(
        &self,
        message: &ExchangeMessage,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let exchange_id = message.exchange_id.to_string();
        let (count, first): (i64, Option<String>) = self
            .with_conn(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*), MIN(timestamp) FROM exchange_data WHERE exchange_id = ?1",
                    params![&exchange_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .await?;

        let first = match first {
            Some(ts) => decode_ts(&ts)?,
            None => message.timestamp,
        };
        let count = usize::try_from(count).unwrap_or(0);

        let too_long = count > self.limits.max_messages;
        let too_old = now - first > self.limits.max_age;
        if too_long || too_old {
            debug!(
                "Exchange {} not engageable: {} messages, first at {}",
                message.exchange_id,
                count,
                first.to_rfc3339()
            );
        }
        Ok(!too_long && !too_old)
    }

    /// Claim `exchange_id` for `owner_id` unless it already has an owner.
    ///
    /// Returns true when this call set the owner. Safe to call repeatedly.
    pub async fn associate_exchange_with_user(
        &self,
        exchange_id: Uuid,
        owner_id: &str,
    ) -> Result<bool> {
        let owner_id = owner_id.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exchange_id = exchange_id.to_string();
            let claimed = tx.execute(
                "INSERT OR IGNORE INTO exchange_owners (exchange_id, owner_id, assigned_at)
                 VALUES (?1, ?2, ?3)",
                params![&exchange_id, &owner_id, encode_ts(&Utc::now())],
            )? == 1;

            let owner: String = tx.query_row(
                "SELECT owner_id FROM exchange_owners WHERE exchange_id = ?1",
                params![&exchange_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE exchange_data SET exchange_owner_id = ?1
                 WHERE exchange_id = ?2 AND exchange_owner_id IS NULL",
                params![&owner, &exchange_id],
            )?;
            tx.commit()?;

            if claimed {
                info!("Exchange {} now owned by {}", exchange_id, owner);
            }
            Ok(claimed)
        })
        .await
    }

    pub async fn get_exchange_owner(&self, exchange_id: Uuid) -> Result<Option<String>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT owner_id FROM exchange_owners WHERE exchange_id = ?1",
                    params![exchange_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    /// Most recently active exchanges first
    pub async fn list_exchanges(&self, limit: usize) -> Result<Vec<ExchangeSummary>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT d.exchange_id, o.owner_id, COUNT(*), MIN(d.timestamp), MAX(d.timestamp)
                 FROM exchange_data d
                 LEFT JOIN exchange_owners o ON o.exchange_id = d.exchange_id
                 GROUP BY d.exchange_id
                 ORDER BY MAX(d.timestamp) DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(exchange_id, owner_id, count, first, last)| {
                    Ok(ExchangeSummary {
                        exchange_id: decode_uuid(&exchange_id)?,
                        owner_id,
                        message_count: usize::try_from(count).unwrap_or(0),
                        first_timestamp: decode_ts(&first)?,
                        last_timestamp: decode_ts(&last)?,
                    })
                })
                .collect()
        })
        .await
    }

    /// Insert or update a system user keyed by normalized email
    pub async fn upsert_user(&self, email: &str, name: &str, timezone: &str) -> Result<User> {
        let email = crate::model::normalize_address(email);
        let name = name.trim().to_owned();
        let timezone = timezone.trim().to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, timezone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email) DO UPDATE SET name = excluded.name, timezone = excluded.timezone",
                params![
                    Uuid::new_v4().to_string(),
                    &email,
                    &name,
                    &timezone,
                    encode_ts(&Utc::now())
                ],
            )?;
            Self::user_by_email(conn, &email)?
                .ok_or_else(|| ExchangeError::NotFound { kind: "user", id: email.clone() })
        })
        .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = crate::model::normalize_address(email);
        self.with_conn(move |conn| Self::user_by_email(conn, &email))
            .await
    }

    fn user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
        Ok(conn
            .query_row(
                "SELECT id, email, name, timezone FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                        timezone: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }
}
