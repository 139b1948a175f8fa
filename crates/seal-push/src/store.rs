//! Persistence for recipients and the dedup ledger.
//!
//! [`Database`] keeps both tables in one SQLite file:
//! - `recipients`: who is watched, on which relays, and where to deliver
//! - `admitted_events`: the dedup ledger, keyed by (event id, recipient)
//!
//! rusqlite is blocking, so every query runs on the blocking thread pool.

use crate::error::{BridgeError, Result};
use crate::ledger::DedupLedger;
use crate::recipient::RecipientKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One watched recipient as stored.
///
/// `recipient` is kept as text so a corrupt row can be reported and skipped
/// instead of failing the whole listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub recipient: String,
    pub relays: Vec<String>,
    pub delivery_target: String,
}

#[async_trait]
pub trait RecipientStore: Send + Sync + 'static {
    async fn list_all(&self) -> Result<Vec<RecipientRecord>>;

    async fn upsert(&self, record: &RecipientRecord) -> Result<()>;

    /// Returns true if a record was removed.
    async fn remove(&self, recipient: &RecipientKey) -> Result<bool>;
}

/// Recipient store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, RecipientRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipientStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<RecipientRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn upsert(&self, record: &RecipientRecord) -> Result<()> {
        self.records
            .lock()
            .insert(record.recipient.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, recipient: &RecipientKey) -> Result<bool> {
        Ok(self.records.lock().remove(recipient.as_hex()).is_some())
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/seal-push.db"),
        }
    }
}

/// Row counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub recipients: u64,
    pub admitted_events: u64,
}

/// SQLite-backed recipient store and dedup ledger.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init_schema(&conn)?;

        info!("Database initialized at {:?}", config.path);

        Ok(Self::from_connection(conn))
    }

    /// Fresh database that lives only as long as this handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admitted_events (
                event_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                admitted_at INTEGER NOT NULL,
                PRIMARY KEY (event_id, recipient)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_admitted_recipient ON admitted_events(recipient)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_admitted_at ON admitted_events(admitted_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS recipients (
                recipient TEXT PRIMARY KEY,
                relays TEXT NOT NULL,
                delivery_target TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        debug!("Database schema ready");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock())).await?
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let recipients: i64 =
                conn.query_row("SELECT COUNT(*) FROM recipients", [], |row| row.get(0))?;
            let admitted_events: i64 =
                conn.query_row("SELECT COUNT(*) FROM admitted_events", [], |row| row.get(0))?;
            Ok(StoreStats {
                recipients: recipients as u64,
                admitted_events: admitted_events as u64,
            })
        })
        .await
    }

    /// Record an admission with an explicit timestamp.
    pub async fn mark_admitted_at(
        &self,
        event_id: &str,
        recipient: &RecipientKey,
        admitted_at: i64,
    ) -> Result<bool> {
        let event_id = event_id.to_string();
        let recipient = recipient.as_hex().to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO admitted_events (event_id, recipient, admitted_at)
                 VALUES (?1, ?2, ?3)",
                params![event_id, recipient, admitted_at],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    /// The stored row for one recipient.
    pub async fn get_recipient(&self, recipient: &RecipientKey) -> Result<Option<RecipientRecord>> {
        let recipient = recipient.as_hex().to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT recipient, relays, delivery_target FROM recipients WHERE recipient = ?1",
                    params![recipient],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(recipient, relays, delivery_target)| -> Result<RecipientRecord> {
                Ok(RecipientRecord {
                    recipient,
                    relays: decode_relays(&relays)?,
                    delivery_target,
                })
            })
            .transpose()
        })
        .await
    }
}

fn decode_relays(json: &str) -> Result<Vec<String>> {
    serde_json::from_str(json).map_err(|e| BridgeError::Storage(format!("relays column: {}", e)))
}

#[async_trait]
impl RecipientStore for Database {
    async fn list_all(&self) -> Result<Vec<RecipientRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT recipient, relays, delivery_target FROM recipients ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (recipient, relays, delivery_target) = row?;
                match decode_relays(&relays) {
                    Ok(relays) => records.push(RecipientRecord {
                        recipient,
                        relays,
                        delivery_target,
                    }),
                    Err(e) => warn!("Skipping stored recipient {}: {}", recipient, e),
                }
            }
            Ok(records)
        })
        .await
    }

    async fn upsert(&self, record: &RecipientRecord) -> Result<()> {
        let relays = serde_json::to_string(&record.relays)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO recipients (recipient, relays, delivery_target, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(recipient) DO UPDATE SET
                    relays = excluded.relays,
                    delivery_target = excluded.delivery_target",
                params![
                    record.recipient,
                    relays,
                    record.delivery_target,
                    chrono::Utc::now().timestamp()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, recipient: &RecipientKey) -> Result<bool> {
        let recipient = recipient.as_hex().to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM recipients WHERE recipient = ?1",
                params![recipient],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl DedupLedger for Database {
    async fn is_admitted(&self, event_id: &str, recipient: &RecipientKey) -> Result<bool> {
        let event_id = event_id.to_string();
        let recipient = recipient.as_hex().to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM admitted_events WHERE event_id = ?1 AND recipient = ?2",
                    params![event_id, recipient],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn mark_admitted(&self, event_id: &str, recipient: &RecipientKey) -> Result<bool> {
        self.mark_admitted_at(event_id, recipient, chrono::Utc::now().timestamp())
            .await
    }

    async fn purge_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - retention.as_secs() as i64;
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM admitted_events WHERE admitted_at < ?1",
                params![cutoff],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn forget_recipient(&self, recipient: &RecipientKey) -> Result<usize> {
        let recipient = recipient.as_hex().to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM admitted_events WHERE recipient = ?1",
                params![recipient],
            )?;
            Ok(removed)
        })
        .await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
