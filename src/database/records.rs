//! Review Record Store: durable per-item scheduling state keyed by `item_id`.
//!
//! Rows that fail to decode are reported as [`StorageError::Corrupt`] by
//! point lookups and skipped (with a warning) by listings, so one bad record
//! never blocks review of the others.

use super::db::{Database, from_epoch, to_epoch};
use crate::error::StorageError;
use crate::models::{ItemStatus, ReviewRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, Transaction, params};

const SELECT_COLUMNS: &str = "SELECT item_id, status, interval_days, repetition_count, \
     ease_factor, next_review_at, history FROM review_records";

#[derive(Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the record for `item_id`, or `None` if the item was never reviewed.
    pub fn get(&self, item_id: &str) -> Result<Option<ReviewRecord>, StorageError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE item_id = ?1"),
                params![item_id],
                RawRecord::from_row,
            )
            .optional()?;

        match raw {
            Some(raw) => raw.decode().map(Some),
            None => Ok(None),
        }
    }

    /// Inserts or overwrites the record for its `item_id`.
    pub fn put(&self, record: &ReviewRecord) -> Result<(), StorageError> {
        let conn = self.db.lock()?;
        write_record(&conn, record)
    }

    /// Records due at or before `before`, earliest-due first.
    pub fn list_due(&self, before: DateTime<Utc>) -> Result<Vec<ReviewRecord>, StorageError> {
        self.query_valid(
            &format!(
                "{SELECT_COLUMNS} WHERE next_review_at <= ?1
                 ORDER BY next_review_at ASC, item_id ASC"
            ),
            params![to_epoch(before)],
        )
    }

    /// Every readable record, ordered by `item_id`.
    pub fn all(&self) -> Result<Vec<ReviewRecord>, StorageError> {
        self.query_valid(&format!("{SELECT_COLUMNS} ORDER BY item_id ASC"), params![])
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM review_records", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    /// All review timestamps across every item, oldest first.
    pub fn review_timestamps(&self) -> Result<Vec<DateTime<Utc>>, StorageError> {
        let mut timestamps: Vec<DateTime<Utc>> = self
            .all()?
            .into_iter()
            .flat_map(|record| record.history)
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    /// Removes every record. Only used by an explicit user data purge.
    pub fn clear_all(&self) -> Result<(), StorageError> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM review_records", [])?;
        Ok(())
    }

    fn query_valid<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<ReviewRecord>, StorageError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for raw in rows {
            match raw.decode() {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(error = %err, "skipping corrupt review record"),
            }
        }
        Ok(records)
    }
}

/// Replaces every record inside an open transaction.
pub(crate) fn replace_all_in_tx(
    tx: &Transaction<'_>,
    records: &[ReviewRecord],
) -> Result<(), StorageError> {
    tx.execute("DELETE FROM review_records", [])?;
    for record in records {
        write_record(tx, record)?;
    }
    Ok(())
}

/// Validates and upserts one record on `conn`, which may be an open transaction.
pub(crate) fn write_record(
    conn: &rusqlite::Connection,
    record: &ReviewRecord,
) -> Result<(), StorageError> {
    record
        .validate()
        .map_err(|details| StorageError::corrupt(&record.item_id, details))?;

    let history: Vec<i64> = record.history.iter().copied().map(to_epoch).collect();
    let history = serde_json::to_string(&history)
        .map_err(|e| StorageError::corrupt(&record.item_id, e.to_string()))?;

    conn.execute(
        "INSERT INTO review_records
             (item_id, status, interval_days, repetition_count, ease_factor,
              next_review_at, history)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(item_id) DO UPDATE SET
             status = excluded.status,
             interval_days = excluded.interval_days,
             repetition_count = excluded.repetition_count,
             ease_factor = excluded.ease_factor,
             next_review_at = excluded.next_review_at,
             history = excluded.history",
        params![
            record.item_id,
            record.status.as_str(),
            record.interval_days,
            record.repetition_count,
            record.ease_factor,
            to_epoch(record.next_review_at),
            history,
        ],
    )?;
    Ok(())
}

/// A row read without type coercion, so malformed columns become corruption
/// reports instead of query failures.
struct RawRecord {
    item_id: String,
    status: Value,
    interval_days: Value,
    repetition_count: Value,
    ease_factor: Value,
    next_review_at: Value,
    history: Value,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_id: row.get(0)?,
            status: row.get(1)?,
            interval_days: row.get(2)?,
            repetition_count: row.get(3)?,
            ease_factor: row.get(4)?,
            next_review_at: row.get(5)?,
            history: row.get(6)?,
        })
    }

    fn decode(self) -> Result<ReviewRecord, StorageError> {
        let item_id = self.item_id;
        let corrupt = |details: String| StorageError::corrupt(item_id.clone(), details);

        let status = match &self.status {
            Value::Text(s) => ItemStatus::parse(s),
            _ => None,
        }
        .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;

        let interval_days = as_u32(&self.interval_days)
            .ok_or_else(|| corrupt(format!("bad interval_days {:?}", self.interval_days)))?;
        let repetition_count = as_u32(&self.repetition_count)
            .ok_or_else(|| corrupt(format!("bad repetition_count {:?}", self.repetition_count)))?;
        let ease_factor = match self.ease_factor {
            Value::Real(v) => v,
            Value::Integer(v) => v as f64,
            ref other => return Err(corrupt(format!("bad ease_factor {other:?}"))),
        };
        let next_review_at = match self.next_review_at {
            Value::Integer(secs) => from_epoch(secs),
            _ => None,
        }
        .ok_or_else(|| corrupt(format!("bad next_review_at {:?}", self.next_review_at)))?;

        let history = match &self.history {
            Value::Text(json) => serde_json::from_str::<Vec<i64>>(json)
                .map_err(|e| corrupt(format!("bad history: {e}")))?
                .into_iter()
                .map(|secs| {
                    from_epoch(secs).ok_or_else(|| corrupt(format!("bad timestamp {secs}")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(corrupt(format!("bad history {other:?}"))),
        };

        let record = ReviewRecord {
            item_id: item_id.clone(),
            status,
            interval_days,
            repetition_count,
            ease_factor,
            next_review_at,
            history,
        };
        record.validate().map_err(corrupt)?;
        Ok(record)
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Integer(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}
