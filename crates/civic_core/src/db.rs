use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: Value,
    pub fetched_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn is_fresh(&self, max_age: Duration, now: OffsetDateTime) -> bool {
        now - self.fetched_at < max_age
    }
}

/// Generic key/value store. Expiry is the caller's business: entries are
/// returned regardless of age.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn set(&self, key: &str, payload: Value, fetched_at: OffsetDateTime) -> Result<()>;
}

pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open cache database {db_path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
          key TEXT PRIMARY KEY,
          payload_json TEXT NOT NULL,
          fetched_at INTEGER NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_cache_entries_fetched_at ON cache_entries(fetched_at);
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row: Option<(String, i64)> = self
            .conn
            .lock()
            .query_row(
                "SELECT payload_json, fetched_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload_json, fetched_at)) = row else {
            return Ok(None);
        };
        let payload = serde_json::from_str(&payload_json)
            .with_context(|| format!("Corrupt cache payload for {key}"))?;
        Ok(Some(CacheEntry {
            payload,
            fetched_at: OffsetDateTime::from_unix_timestamp(fetched_at)?,
        }))
    }

    async fn set(&self, key: &str, payload: Value, fetched_at: OffsetDateTime) -> Result<()> {
        let payload_json = serde_json::to_string(&payload)?;
        self.conn.lock().execute(
            r#"
            INSERT INTO cache_entries (key, payload_json, fetched_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
              payload_json=excluded.payload_json,
              fetched_at=excluded.fetched_at,
              updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
            params![key, payload_json, fetched_at.unix_timestamp()],
        )?;
        Ok(())
    }
}

/// Process-local store, used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, payload: Value, fetched_at: OffsetDateTime) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry { payload, fetched_at });
        Ok(())
    }
}

/// Reads and decodes `key`, ignoring age.
pub async fn load<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(entry) => Ok(Some(serde_json::from_value(entry.payload)?)),
        None => Ok(None),
    }
}

/// Reads and decodes `key` only if it was fetched less than `max_age` ago.
pub async fn load_fresh<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
    max_age: Duration,
    now: OffsetDateTime,
) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(entry) if entry.is_fresh(max_age, now) => {
            Ok(Some(serde_json::from_value(entry.payload)?))
        }
        _ => Ok(None),
    }
}

pub async fn store<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    fetched_at: OffsetDateTime,
) -> Result<()> {
    cache.set(key, serde_json::to_value(value)?, fetched_at).await
}

pub mod keys {
    pub fn sessions(jurisdiction: &str) -> String {
        format!("sessions:{}", jurisdiction.to_uppercase())
    }

    pub fn roster(session_id: &str) -> String {
        format!("roster:{session_id}")
    }

    /// Hash index is scoped per legislator: a bill is only "unchanged" for
    /// someone whose votes on it were already derived.
    pub fn hashes(session_id: &str, legislator_id: &str) -> String {
        format!("hashes:{session_id}:{legislator_id}")
    }

    pub fn rollcalls(legislator_id: &str) -> String {
        format!("rollcalls:{legislator_id}")
    }

    pub fn votes(legislator_id: &str) -> String {
        format!("votes:{legislator_id}")
    }

    pub fn rollcall(roll_call_id: &str) -> String {
        format!("rollcall:{roll_call_id}")
    }
}
