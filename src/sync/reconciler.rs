//! Sync Reconciler: drains the offline queue against a remote endpoint.
//!
//! Entries are delivered oldest-first. Success removes an entry, a retryable
//! failure puts it back and holds the rest of that item's entries until the
//! next pass, and a permanent rejection moves it to the dead-letter table.
//! Nothing is removed without a confirmation, including when a pass is
//! cancelled mid-flight.

use super::remote::{RemoteEndpoint, RemoteOutcome};
use crate::config::SyncConfig;
use crate::database::SyncQueue;
use crate::error::QueueError;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tokio::sync::Mutex;

/// Outcome of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Delivery attempts made.
    pub attempted: usize,
    /// Entry ids confirmed by the remote and removed.
    pub confirmed: Vec<String>,
    /// Entries left pending after a retryable failure.
    pub retried: usize,
    /// Entry ids moved to the dead-letter table.
    pub dead_lettered: Vec<String>,
    /// Items whose later entries were held back this pass.
    pub deferred_items: BTreeSet<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.deferred_items.is_empty()
    }
}

/// Returns a claimed entry to pending unless its outcome was recorded.
struct InFlight<'a> {
    queue: &'a SyncQueue,
    entry_id: &'a str,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(queue: &'a SyncQueue, entry_id: &'a str) -> Self {
        Self {
            queue,
            entry_id,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.queue.release(self.entry_id) {
            Ok(()) => tracing::debug!(entry_id = self.entry_id, "released unconfirmed sync entry"),
            Err(err) => tracing::warn!(
                entry_id = self.entry_id,
                error = %err,
                "could not release sync entry; it is recovered on next open"
            ),
        }
    }
}

/// Runs reconciliation passes for one queue and remote. Passes through the
/// same reconciler never overlap.
pub struct Reconciler<R> {
    queue: SyncQueue,
    remote: R,
    batch_size: usize,
    pass_lock: Mutex<()>,
}

impl<R: RemoteEndpoint> Reconciler<R> {
    pub fn new(queue: SyncQueue, remote: R, config: &SyncConfig) -> Self {
        Self {
            queue,
            remote,
            batch_size: config.batch_size.max(1),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Runs one pass. Waits for a pass already in progress to finish first.
    pub async fn reconcile(&self) -> Result<ReconcileReport, QueueError> {
        let _pass = self.pass_lock.lock().await;
        let report = reconcile(&self.queue, &self.remote, self.batch_size).await?;
        if !report.is_empty() {
            tracing::info!(
                attempted = report.attempted,
                confirmed = report.confirmed.len(),
                retried = report.retried,
                dead_lettered = report.dead_lettered.len(),
                deferred_items = report.deferred_items.len(),
                "sync pass finished"
            );
        }
        Ok(report)
    }
}

/// One pass over the entries queued when the pass starts. Entries enqueued
/// meanwhile wait for the next pass.
pub async fn reconcile<R: RemoteEndpoint + ?Sized>(
    queue: &SyncQueue,
    remote: &R,
    batch_size: usize,
) -> Result<ReconcileReport, QueueError> {
    let mut report = ReconcileReport::default();
    let upper = queue.high_water_mark()?;
    // Items another pass is delivering right now.
    let mut held: HashSet<String> = queue.in_flight_items()?;
    let mut cursor = 0;

    'batches: loop {
        let batch = queue.peek_batch_after(cursor, batch_size.max(1))?;
        if batch.is_empty() {
            break;
        }

        for entry in batch {
            if entry.seq > upper {
                break 'batches;
            }
            cursor = entry.seq;

            if held.contains(&entry.item_id) || !queue.claim(&entry.entry_id)? {
                report.deferred_items.insert(entry.item_id.clone());
                held.insert(entry.item_id);
                continue;
            }
            let in_flight = InFlight::new(queue, &entry.entry_id);
            report.attempted += 1;

            match remote
                .apply(&entry.entry_id, &entry.target, &entry.payload)
                .await
            {
                RemoteOutcome::Accepted => {
                    queue.remove(&entry.entry_id)?;
                    in_flight.settle();
                    report.confirmed.push(entry.entry_id.clone());
                }
                RemoteOutcome::Unavailable { reason } => {
                    queue.record_failure(&entry.entry_id, &reason)?;
                    in_flight.settle();
                    tracing::warn!(
                        entry_id = %entry.entry_id,
                        item_id = %entry.item_id,
                        attempts = entry.attempts + 1,
                        %reason,
                        "remote unavailable; entry stays pending"
                    );
                    report.retried += 1;
                    held.insert(entry.item_id.clone());
                }
                RemoteOutcome::Rejected { reason } => {
                    queue.dead_letter(&entry.entry_id, &reason)?;
                    in_flight.settle();
                    tracing::warn!(
                        entry_id = %entry.entry_id,
                        item_id = %entry.item_id,
                        %reason,
                        "remote rejected entry; moved to dead letters"
                    );
                    report.dead_lettered.push(entry.entry_id.clone());
                }
            }
        }
    }

    Ok(report)
}
