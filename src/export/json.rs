//! Full-state JSON snapshots of the review store.
//!
//! Export writes every review record (and optionally the pending sync entries)
//! to one document. Import is all-or-nothing: the document is parsed and
//! validated completely before the store is touched, and the swap happens in a
//! single transaction.

use crate::database::queue::restore_in_tx;
use crate::database::records::replace_all_in_tx;
use crate::database::Database;
use crate::error::{Error, ImportError, StorageError};
use crate::models::{ReviewRecord, SyncQueueEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<ReviewRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<SyncQueueEntry>,
}

/// What an import changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub records: usize,
    pub restored_entries: usize,
}

/// Captures the current state of `db`.
pub fn snapshot(db: &Database, include_pending: bool) -> Result<Snapshot, Error> {
    let records = db.records().all()?;
    let pending = if include_pending {
        db.queue().all()?
    } else {
        Vec::new()
    };
    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        exported_at: Utc::now(),
        records,
        pending,
    })
}

pub fn export_json(db: &Database, include_pending: bool) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(&snapshot(db, include_pending)?)?)
}

/// Exports a snapshot to a JSON file at the specified path.
pub fn export_json_to_path(db: &Database, path: &Path, include_pending: bool) -> Result<(), Error> {
    let json = export_json(db, include_pending)?;
    fs::write(path, json)?;
    Ok(())
}

/// Replaces the store with the snapshot in `json`.
pub fn import_json(db: &Database, json: &str) -> Result<ImportSummary, ImportError> {
    let snapshot: Snapshot = serde_json::from_str(json)?;
    import_snapshot(db, &snapshot)
}

/// Imports a snapshot from a JSON file.
pub fn import_json_from_path(db: &Database, path: &Path) -> Result<ImportSummary, ImportError> {
    let contents = fs::read_to_string(path)?;
    import_json(db, &contents)
}

pub fn import_snapshot(db: &Database, snapshot: &Snapshot) -> Result<ImportSummary, ImportError> {
    validate(snapshot)?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;
    replace_all_in_tx(&tx, &snapshot.records)?;
    let restored_entries = restore_in_tx(&tx, &snapshot.pending)
        .map_err(|e| ImportError::Storage(StorageError::unavailable(e)))?;
    tx.commit()?;

    tracing::info!(
        records = snapshot.records.len(),
        restored_entries,
        "snapshot imported"
    );
    Ok(ImportSummary {
        records: snapshot.records.len(),
        restored_entries,
    })
}

fn validate(snapshot: &Snapshot) -> Result<(), ImportError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(ImportError::UnsupportedVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let mut seen = HashSet::new();
    for record in &snapshot.records {
        record.validate().map_err(|reason| ImportError::InvalidRecord {
            item_id: record.item_id.clone(),
            reason,
        })?;
        if !seen.insert(record.item_id.as_str()) {
            return Err(ImportError::DuplicateItem(record.item_id.clone()));
        }
    }

    for entry in &snapshot.pending {
        if entry.entry_id.is_empty() || entry.item_id.is_empty() {
            return Err(ImportError::InvalidRecord {
                item_id: entry.item_id.clone(),
                reason: format!("pending entry '{}' is missing an id", entry.entry_id),
            });
        }
    }
    Ok(())
}
