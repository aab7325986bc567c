//! The review-recording entry point.
//!
//! `record_review` schedules the item, then writes the new record and its sync
//! mutation in one commit. Scheduling and storage failures fail the review.
//! When only the queue insert fails, the record is committed alone and the
//! failure is logged, so reviews keep working on a device that stays offline.

use crate::config::SchedulerConfig;
use crate::database::queue::insert_entry;
use crate::database::records::write_record;
use crate::database::{Database, RecordStore, SyncQueue};
use crate::error::{QueueError, ReviewError, SchedulingError, StorageError};
use crate::models::{ReviewRecord, SyncTarget, schedule};
use chrono::{DateTime, Utc};

pub struct ReviewEngine {
    db: Database,
    records: RecordStore,
    queue: SyncQueue,
    config: SchedulerConfig,
}

impl ReviewEngine {
    pub fn new(db: &Database, config: SchedulerConfig) -> Self {
        Self {
            db: db.clone(),
            records: db.records(),
            queue: db.queue(),
            config,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn record_review(&self, item_id: &str, quality: i32) -> Result<ReviewRecord, ReviewError> {
        self.record_review_at(item_id, quality, Utc::now())
    }

    /// Records a review that happened at `now`.
    pub fn record_review_at(
        &self,
        item_id: &str,
        quality: i32,
        now: DateTime<Utc>,
    ) -> Result<ReviewRecord, ReviewError> {
        if item_id.is_empty() {
            return Err(SchedulingError::EmptyItemId.into());
        }

        let prior = match self.records.get(item_id)? {
            Some(record) => record,
            None => ReviewRecord::new(item_id, self.config.initial_ease, now),
        };
        let next = schedule(quality, &prior, now, &self.config)?;

        if let Some(entry_id) = self.save_and_enqueue(&next)? {
            tracing::debug!(item_id, %entry_id, status = %next.status, "review recorded");
        }
        Ok(next)
    }

    /// Upserts `record` and queues it for the remote in one transaction. The
    /// queue insert runs in a savepoint; if it fails only the record is
    /// committed and `None` is returned.
    fn save_and_enqueue(&self, record: &ReviewRecord) -> Result<Option<String>, StorageError> {
        let mut conn = self.db.lock()?;
        let mut tx = conn.transaction()?;
        write_record(&tx, record)?;

        let target = SyncTarget::put_record(&record.item_id);
        let queued = {
            let sp = tx.savepoint()?;
            let inserted = serde_json::to_string(record)
                .map_err(QueueError::from)
                .and_then(|payload| insert_entry(&sp, &record.item_id, &target, &payload));
            match inserted {
                Ok(entry_id) => {
                    sp.commit()?;
                    Some(entry_id)
                }
                // Dropping the savepoint rolls the partial insert back.
                Err(err) => {
                    tracing::error!(
                        item_id = %record.item_id,
                        error = %err,
                        "review saved locally but could not be queued for sync"
                    );
                    None
                }
            }
        };

        tx.commit()?;
        Ok(queued)
    }

    /// Items due at `now`, earliest-due first, capped at `limit` when given.
    pub fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<ReviewRecord>, StorageError> {
        let mut due = self.records.list_due(now)?;
        if let Some(limit) = limit {
            due.truncate(limit);
        }
        Ok(due)
    }
}
