//! Pluggable credential cache stores.
//!
//! A store lets several broker instances (typically separate processes)
//! share one externally-persisted access token. Store failures degrade to a
//! cache miss; the broker falls back to the network. Last-write-wins between
//! concurrently refreshing instances is accepted.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::error::Result;
use crate::token::AccessToken;

/// Shared credential persistence.
///
/// `get` maps every failure mode (absent key, store error, corrupt value) to
/// `None`; only `set` surfaces errors, and the broker merely logs them.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<AccessToken>;
    fn set(&self, key: &str, token: &AccessToken) -> Result<()>;
}

/// Process-local store backed by a plain map.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, AccessToken>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<AccessToken> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, token: &AccessToken) -> Result<()> {
        self.entries.lock().insert(key.to_string(), token.clone());
        Ok(())
    }
}

/// SQLite-backed store for sharing a credential across processes on one host.
///
/// A single connection behind a mutex; SQLite handles file locking itself.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Create or open a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS access_tokens (
                key TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;
        debug!("credential store schema initialized");
        Ok(())
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str) -> Option<AccessToken> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT token, expires_at FROM access_tokens WHERE key = ?1",
                params![key],
                |row| {
                    let token: String = row.get(0)?;
                    let expires_at: i64 = row.get(1)?;
                    Ok((token, expires_at))
                },
            )
            .optional();
        match row {
            Ok(Some((token, expires_at))) => {
                let expires_at = chrono::DateTime::from_timestamp(expires_at, 0)?;
                Some(AccessToken { token, expires_at })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("credential store read failed, treating as miss: {}", e);
                None
            }
        }
    }

    fn set(&self, key: &str, token: &AccessToken) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO access_tokens (key, token, expires_at)
             VALUES (?1, ?2, ?3)",
            params![key, token.token, token.expires_at.timestamp()],
        )?;
        Ok(())
    }
}
