//! SQLite connection setup shared by the record store, the sync queue and the
//! app state table.
//!
//! A single connection guarded by a mutex backs every handle, so a reader never
//! observes a partially applied write and multi-table operations (snapshot
//! import) can run in one transaction.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::queue::SyncQueue;
use super::records::RecordStore;
use super::state::AppState;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS review_records (
        item_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        interval_days INTEGER NOT NULL,
        repetition_count INTEGER NOT NULL,
        ease_factor REAL NOT NULL,
        next_review_at INTEGER NOT NULL,
        history TEXT NOT NULL DEFAULT '[]'
    );
    CREATE INDEX IF NOT EXISTS idx_review_records_due
        ON review_records (next_review_at);

    CREATE TABLE IF NOT EXISTS sync_queue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id TEXT NOT NULL UNIQUE,
        item_id TEXT NOT NULL,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        payload TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        state TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_sync_queue_item
        ON sync_queue (item_id, seq);

    CREATE TABLE IF NOT EXISTS sync_dead_letters (
        entry_id TEXT PRIMARY KEY,
        item_id TEXT NOT NULL,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        payload TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        attempts INTEGER NOT NULL,
        failed_at INTEGER NOT NULL,
        reason TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS app_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Handle to the engine's database. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StorageError::unavailable)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        // FULL sync: a write is on disk before the call returns.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        // Anything still in flight belonged to a pass that never finished.
        let recovered = conn.execute(
            "UPDATE sync_queue SET state = 'pending' WHERE state = 'in_flight'",
            [],
        )?;
        if recovered > 0 {
            tracing::info!(recovered, "returned interrupted sync entries to pending");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn records(&self) -> RecordStore {
        RecordStore::new(self.clone())
    }

    pub fn queue(&self) -> SyncQueue {
        SyncQueue::new(self.clone())
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.clone())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::unavailable(format!("connection lock poisoned: {e}")))
    }
}

pub(crate) fn to_epoch(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

pub(crate) fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
