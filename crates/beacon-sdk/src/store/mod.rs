//! Persistent key-value storage.
//!
//! The engine depends on a durable key→bytes store but does not prescribe
//! one: `KeyValueStore` is the collaborator interface, `SqliteKeyValueStore`
//! the batteries-included adapter, and `MemoryKeyValueStore` the test double.

mod retry;

pub use retry::{RetryQueue, DEFAULT_MAX_STORAGE_SIZE};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use beacon_core::{BeaconError, BeaconResult};

/// Persisted state keys, namespaced per concern.
pub mod keys {
    pub const SESSION_ID: &str = "session_id";
    pub const LOCAL_DEVICE_ID: &str = "local_device_id";
    pub const USER_ID: &str = "user_id";
    pub const DEVICE: &str = "device";
    pub const LAST_DEVICE_REQUEST: &str = "last_device_request";
    pub const FAILED_EVENTS: &str = "failed_events";
    pub const FAILED_PROFILES: &str = "failed_profiles";
    pub const CAMPAIGNS: &str = "campaigns";
    pub const CAMPAIGNS_LAST_FETCH: &str = "campaigns_last_fetch";
    pub const LAST_EVENT_TIME: &str = "last_event_time";

    pub fn impressions(campaign_id: &str) -> String {
        format!("impressions_{campaign_id}")
    }

    pub fn hide_campaign(campaign_id: &str) -> String {
        format!("hide_campaign_{campaign_id}")
    }
}

/// Durable key→bytes store with get/set/delete.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> BeaconResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> BeaconResult<()>;
    fn delete(&self, key: &str) -> BeaconResult<()>;
}

/// JSON codec helpers over any store.
pub trait KeyValueStoreExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> BeaconResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> BeaconResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| BeaconError::Storage(format!("encode {key}: {e}")))?;
        self.set(key, &bytes)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

fn storage_err(err: rusqlite::Error) -> BeaconError {
    BeaconError::Storage(err.to_string())
}

/// SQLite-backed store.
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Open (or create) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> BeaconResult<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> BeaconResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> BeaconResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
        "#,
        )
        .map_err(storage_err)?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> BeaconResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(storage_err)
    }

    fn set(&self, key: &str, value: &[u8]) -> BeaconResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> BeaconResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(storage_err)?;
        Ok(())
    }
}

/// In-memory store used by tests and available as a non-durable fallback.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> BeaconResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> BeaconResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> BeaconResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
