//! Offline Mutation Queue: a durable, ordered log of remote-bound mutations.
//!
//! Entries are appended with a generated `entry_id` (the remote's idempotency
//! key) and leave the queue only when the remote confirms them or rejects them
//! permanently, in which case they move to the dead-letter table. Every write
//! is committed before the call returns.

use super::db::{Database, from_epoch, to_epoch};
use crate::error::QueueError;
use crate::models::{DeadLetter, EntryState, SyncMethod, SyncQueueEntry, SyncTarget};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::collections::HashSet;
use uuid::Uuid;

const ENTRY_COLUMNS: &str =
    "seq, entry_id, item_id, method, path, payload, enqueued_at, state, attempts, last_error";

#[derive(Clone)]
pub struct SyncQueue {
    db: Database,
}

impl SyncQueue {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends a mutation for `item_id` and returns its generated `entry_id`.
    pub fn enqueue(
        &self,
        item_id: &str,
        target: SyncTarget,
        payload: String,
    ) -> Result<String, QueueError> {
        let conn = self.db.lock()?;
        insert_entry(&conn, item_id, &target, &payload)
    }

    /// Serializes `payload` as JSON and enqueues it.
    pub fn enqueue_json<T: serde::Serialize>(
        &self,
        item_id: &str,
        target: SyncTarget,
        payload: &T,
    ) -> Result<String, QueueError> {
        let body = serde_json::to_string(payload)?;
        self.enqueue(item_id, target, body)
    }

    /// Up to `max` of the oldest pending entries, without removing them.
    pub fn peek_batch(&self, max: usize) -> Result<Vec<SyncQueueEntry>, QueueError> {
        self.peek_batch_after(0, max)
    }

    /// Up to `max` of the oldest pending entries positioned after `after_seq`.
    pub fn peek_batch_after(
        &self,
        after_seq: i64,
        max: usize,
    ) -> Result<Vec<SyncQueueEntry>, QueueError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE state = 'pending' AND seq > ?1
             ORDER BY seq ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![after_seq, max as i64], RawEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(decode_all(rows))
    }

    /// Removes an entry. Removing an unknown or already removed id is a no-op.
    pub fn remove(&self, entry_id: &str) -> Result<(), QueueError> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM sync_queue WHERE entry_id = ?1", params![entry_id])?;
        Ok(())
    }

    /// Moves a pending entry to in-flight. Only the oldest queued entry of an
    /// item can be claimed, so an item's mutations go out in enqueue order.
    /// Returns `false` when the entry is gone, already claimed, or waiting
    /// behind an older entry of the same item.
    pub fn claim(&self, entry_id: &str) -> Result<bool, QueueError> {
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "UPDATE sync_queue SET state = 'in_flight'
             WHERE entry_id = ?1 AND state = 'pending'
               AND NOT EXISTS (
                   SELECT 1 FROM sync_queue AS older
                   WHERE older.item_id = sync_queue.item_id AND older.seq < sync_queue.seq
               )",
            params![entry_id],
        )?;
        Ok(rows > 0)
    }

    /// Returns an unconfirmed in-flight entry to pending.
    pub fn release(&self, entry_id: &str) -> Result<(), QueueError> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE sync_queue SET state = 'pending'
             WHERE entry_id = ?1 AND state = 'in_flight'",
            params![entry_id],
        )?;
        Ok(())
    }

    /// Returns an entry to pending after a retryable failure.
    pub fn record_failure(&self, entry_id: &str, reason: &str) -> Result<(), QueueError> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE sync_queue
             SET state = 'pending', attempts = attempts + 1, last_error = ?2
             WHERE entry_id = ?1",
            params![entry_id, reason],
        )?;
        Ok(())
    }

    /// Moves an entry to the dead-letter table. Returns `false` if it was not queued.
    pub fn dead_letter(&self, entry_id: &str, reason: &str) -> Result<bool, QueueError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let moved = tx.execute(
            "INSERT OR REPLACE INTO sync_dead_letters
                 (entry_id, item_id, method, path, payload, enqueued_at,
                  attempts, failed_at, reason)
             SELECT entry_id, item_id, method, path, payload, enqueued_at, attempts + 1, ?2, ?3
             FROM sync_queue WHERE entry_id = ?1",
            params![entry_id, to_epoch(Utc::now()), reason],
        )?;
        tx.execute("DELETE FROM sync_queue WHERE entry_id = ?1", params![entry_id])?;
        tx.commit()?;

        Ok(moved > 0)
    }

    /// Looks up a queued entry in any state.
    pub fn get(&self, entry_id: &str) -> Result<Option<SyncQueueEntry>, QueueError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE entry_id = ?1"),
                params![entry_id],
                RawEntry::from_row,
            )
            .optional()?;
        raw.map(RawEntry::decode).transpose()
    }

    /// Items that currently have an entry in flight.
    pub fn in_flight_items(&self) -> Result<HashSet<String>, QueueError> {
        let conn = self.db.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT item_id FROM sync_queue WHERE state = 'in_flight'")?;
        let items = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(items)
    }

    /// Position of the newest entry, or 0 for an empty queue.
    pub fn high_water_mark(&self) -> Result<i64, QueueError> {
        let conn = self.db.lock()?;
        let seq: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM sync_queue", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0))
    }

    /// Entries in the queue, pending or in flight.
    pub fn len(&self) -> Result<usize, QueueError> {
        self.count("SELECT COUNT(*) FROM sync_queue")
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        self.count("SELECT COUNT(*) FROM sync_queue WHERE state = 'pending'")
    }

    pub fn dead_letter_count(&self) -> Result<usize, QueueError> {
        self.count("SELECT COUNT(*) FROM sync_dead_letters")
    }

    /// Every queued entry in order, for snapshot export.
    pub fn all(&self) -> Result<Vec<SyncQueueEntry>, QueueError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue ORDER BY seq ASC"
        ))?;
        let rows = stmt
            .query_map([], RawEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(decode_all(rows))
    }

    /// Dead-lettered entries, most recent failure first.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT 0, entry_id, item_id, method, path, payload, enqueued_at, 'pending', attempts,
                    reason, failed_at
             FROM sync_dead_letters
             ORDER BY failed_at DESC, entry_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let raw = RawEntry::from_row(row)?;
                let failed_at: i64 = row.get(10)?;
                Ok((raw, failed_at))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut letters = Vec::with_capacity(rows.len());
        for (raw, failed_at) in rows {
            let entry = raw.decode()?;
            let failed_at = from_epoch(failed_at).unwrap_or(entry.enqueued_at);
            letters.push(DeadLetter {
                reason: entry.last_error.clone().unwrap_or_default(),
                entry,
                failed_at,
            });
        }
        Ok(letters)
    }

    fn count(&self, sql: &str) -> Result<usize, QueueError> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Appends a pending entry on `conn`, which may be an open transaction.
pub(crate) fn insert_entry(
    conn: &Connection,
    item_id: &str,
    target: &SyncTarget,
    payload: &str,
) -> Result<String, QueueError> {
    let entry_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sync_queue (entry_id, item_id, method, path, payload, enqueued_at, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
        params![
            entry_id,
            item_id,
            target.method.as_str(),
            target.path,
            payload,
            to_epoch(Utc::now()),
        ],
    )?;
    tracing::debug!(%entry_id, item_id, target = %target, "enqueued sync mutation");
    Ok(entry_id)
}

/// Re-queues entries from a snapshot inside an open transaction. Entries whose
/// id is already queued or dead-lettered are left alone. Returns how many were added.
pub(crate) fn restore_in_tx(
    tx: &Transaction<'_>,
    entries: &[SyncQueueEntry],
) -> Result<usize, QueueError> {
    let mut restored = 0;
    for entry in entries {
        restored += tx.execute(
            "INSERT INTO sync_queue
                 (entry_id, item_id, method, path, payload, enqueued_at,
                  state, attempts, last_error)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8
             WHERE NOT EXISTS (SELECT 1 FROM sync_queue WHERE entry_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM sync_dead_letters WHERE entry_id = ?1)",
            params![
                entry.entry_id,
                entry.item_id,
                entry.target.method.as_str(),
                entry.target.path,
                entry.payload,
                to_epoch(entry.enqueued_at),
                entry.attempts,
                entry.last_error,
            ],
        )?;
    }
    Ok(restored)
}

fn decode_all(rows: Vec<RawEntry>) -> Vec<SyncQueueEntry> {
    rows.into_iter()
        .filter_map(|raw| match raw.decode() {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "skipping corrupt sync queue entry");
                None
            }
        })
        .collect()
}

struct RawEntry {
    seq: i64,
    entry_id: String,
    item_id: String,
    method: String,
    path: String,
    payload: String,
    enqueued_at: i64,
    state: String,
    attempts: i64,
    last_error: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            entry_id: row.get(1)?,
            item_id: row.get(2)?,
            method: row.get(3)?,
            path: row.get(4)?,
            payload: row.get(5)?,
            enqueued_at: row.get(6)?,
            state: row.get(7)?,
            attempts: row.get(8)?,
            last_error: row.get(9)?,
        })
    }

    fn decode(self) -> Result<SyncQueueEntry, QueueError> {
        let corrupt = |details: String| QueueError::CorruptEntry {
            entry_id: self.entry_id.clone(),
            details,
        };
        let method = SyncMethod::parse(&self.method)
            .ok_or_else(|| corrupt(format!("unknown method {:?}", self.method)))?;
        let state = EntryState::parse(&self.state)
            .ok_or_else(|| corrupt(format!("unknown state {:?}", self.state)))?;
        let enqueued_at: DateTime<Utc> = from_epoch(self.enqueued_at)
            .ok_or_else(|| corrupt(format!("bad enqueued_at {}", self.enqueued_at)))?;

        Ok(SyncQueueEntry {
            seq: self.seq,
            entry_id: self.entry_id.clone(),
            item_id: self.item_id.clone(),
            target: SyncTarget {
                method,
                path: self.path.clone(),
            },
            payload: self.payload.clone(),
            enqueued_at,
            state,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_error: self.last_error.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (Database, SyncQueue) {
        let db = Database::open_in_memory().unwrap();
        let queue = db.queue();
        (db, queue)
    }

    fn push(queue: &SyncQueue, item_id: &str) -> String {
        let payload = format!("{{\"item\":\"{item_id}\"}}");
        queue
            .enqueue(item_id, SyncTarget::put_record(item_id), payload)
            .unwrap()
    }

    #[test]
    fn test_enqueue_generates_unique_ids() {
        let (_db, queue) = queue();
        let a = push(&queue, "a");
        let b = push(&queue, "a");
        assert_ne!(a, b);
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn test_peek_is_fifo_and_non_destructive() {
        let (_db, queue) = queue();
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|i| push(&queue, i)).collect();

        let batch = queue.peek_batch(2).unwrap();
        assert_eq!(
            batch.iter().map(|e| e.entry_id.clone()).collect::<Vec<_>>(),
            ids[..2].to_vec()
        );
        assert_eq!(queue.peek_batch(10).unwrap().len(), 3);

        let after = queue.peek_batch_after(batch[1].seq, 10).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].entry_id, ids[2]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_db, queue) = queue();
        let id = push(&queue, "a");
        queue.remove(&id).unwrap();
        queue.remove(&id).unwrap();
        queue.remove("never-existed").unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (_db, queue) = queue();
        let id = push(&queue, "a");

        assert!(queue.claim(&id).unwrap());
        assert!(!queue.claim(&id).unwrap());
        assert!(queue.peek_batch(10).unwrap().is_empty());
        assert!(queue.in_flight_items().unwrap().contains("a"));

        queue.release(&id).unwrap();
        assert_eq!(queue.peek_batch(10).unwrap().len(), 1);
        assert!(queue.in_flight_items().unwrap().is_empty());
    }

    #[test]
    fn test_claim_waits_for_older_entry_of_same_item() {
        let (_db, queue) = queue();
        let first = push(&queue, "a");
        let second = push(&queue, "a");
        let other = push(&queue, "b");

        assert!(!queue.claim(&second).unwrap());
        assert!(queue.claim(&other).unwrap());
        assert!(queue.claim(&first).unwrap());
        assert!(!queue.claim(&second).unwrap());

        queue.remove(&first).unwrap();
        assert!(queue.claim(&second).unwrap());
    }

    #[test]
    fn test_record_failure_counts_attempts() {
        let (_db, queue) = queue();
        let id = push(&queue, "a");
        queue.claim(&id).unwrap();
        queue.record_failure(&id, "timeout").unwrap();

        let entry = queue.get(&id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_dead_letter_moves_entry() {
        let (_db, queue) = queue();
        let id = push(&queue, "a");
        queue.claim(&id).unwrap();

        assert!(queue.dead_letter(&id, "schema rejected").unwrap());
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.dead_letter_count().unwrap(), 1);

        let letters = queue.dead_letters().unwrap();
        assert_eq!(letters[0].entry.entry_id, id);
        assert_eq!(letters[0].reason, "schema rejected");
        assert_eq!(letters[0].entry.attempts, 1);

        assert!(!queue.dead_letter(&id, "again").unwrap());
        assert_eq!(queue.dead_letter_count().unwrap(), 1);
    }

    #[test]
    fn test_in_flight_entries_recover_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");
        let id = {
            let db = Database::open(&path).unwrap();
            let queue = db.queue();
            let id = push(&queue, "a");
            assert!(queue.claim(&id).unwrap());
            id
            // Dropped while in flight, as after a crash.
        };

        let db = Database::open(&path).unwrap();
        let entry = db.queue().get(&id).unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(db.queue().peek_batch(1).unwrap()[0].entry_id, id);
    }

    #[test]
    fn test_enqueue_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");
        let id = {
            let db = Database::open(&path).unwrap();
            push(&db.queue(), "a")
        };
        let db = Database::open(&path).unwrap();
        assert!(db.queue().get(&id).unwrap().is_some());
    }

    #[test]
    fn test_high_water_mark() {
        let (_db, queue) = queue();
        assert_eq!(queue.high_water_mark().unwrap(), 0);
        push(&queue, "a");
        push(&queue, "b");
        let entries = queue.all().unwrap();
        assert_eq!(queue.high_water_mark().unwrap(), entries[1].seq);
    }

    #[test]
    fn test_restore_skips_known_entries() {
        let (db, queue) = queue();
        let kept = push(&queue, "a");
        let dead = push(&queue, "b");
        queue.dead_letter(&dead, "rejected").unwrap();

        let mut snapshot = queue.all().unwrap();
        snapshot.push(SyncQueueEntry {
            entry_id: "restored".to_string(),
            item_id: "c".to_string(),
            target: SyncTarget::put_record("c"),
            ..snapshot[0].clone()
        });
        snapshot.push(SyncQueueEntry {
            entry_id: dead.clone(),
            ..snapshot[0].clone()
        });

        let mut conn = db.lock().unwrap();
        let tx = conn.transaction().unwrap();
        assert_eq!(restore_in_tx(&tx, &snapshot).unwrap(), 1);
        tx.commit().unwrap();
        drop(conn);

        let ids: Vec<String> = queue.all().unwrap().into_iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec![kept, "restored".to_string()]);
    }
}
