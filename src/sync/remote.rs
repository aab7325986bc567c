//! The abstract remote endpoint that queued mutations are delivered to.

use crate::models::SyncTarget;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Applied, or recognized as a duplicate of an already applied `entry_id`.
    Accepted,
    /// Permanently refused (validation failure). Not retried.
    Rejected { reason: String },
    /// Not reachable or failed transiently (timeout, 5xx). Retried later.
    Unavailable { reason: String },
}

/// A remote system accepting `(entry_id, target, payload)`.
///
/// Implementations must treat `entry_id` as an idempotency key: delivering the
/// same entry twice must not apply it twice.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn apply(&self, entry_id: &str, target: &SyncTarget, payload: &str) -> RemoteOutcome;
}

#[async_trait]
impl<T: RemoteEndpoint + ?Sized> RemoteEndpoint for Arc<T> {
    async fn apply(&self, entry_id: &str, target: &SyncTarget, payload: &str) -> RemoteOutcome {
        (**self).apply(entry_id, target, payload).await
    }
}

/// Loopback endpoint that keeps applied mutations in memory.
///
/// It deduplicates by `entry_id` like a real server must, and can be switched
/// offline, told to reject paths, or scripted with outcomes. Useful for local
/// dry runs and tests.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

#[derive(Default)]
struct RemoteState {
    applied: HashMap<String, (SyncTarget, String)>,
    order: Vec<String>,
    calls: usize,
    offline: bool,
    rejected_paths: HashSet<String>,
    scripted: VecDeque<RemoteOutcome>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Rejects every delivery addressed to `path`.
    pub fn reject_path(&self, path: impl Into<String>) {
        self.lock().rejected_paths.insert(path.into());
    }

    /// Queues an outcome returned by the next call, ahead of normal handling.
    pub fn script(&self, outcome: RemoteOutcome) {
        self.lock().scripted.push_back(outcome);
    }

    /// Entry ids applied, in the order they were first accepted.
    pub fn applied_ids(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Payload applied for `entry_id`, if any.
    pub fn payload(&self, entry_id: &str) -> Option<String> {
        self.lock().applied.get(entry_id).map(|(_, p)| p.clone())
    }

    /// Total delivery attempts, including duplicates and failures.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RemoteEndpoint for InMemoryRemote {
    async fn apply(&self, entry_id: &str, target: &SyncTarget, payload: &str) -> RemoteOutcome {
        let mut state = self.lock();
        state.calls += 1;

        let outcome = match state.scripted.pop_front() {
            Some(outcome) => outcome,
            None if state.offline => RemoteOutcome::Unavailable {
                reason: "remote offline".to_string(),
            },
            None if state.rejected_paths.contains(&target.path) => RemoteOutcome::Rejected {
                reason: format!("{target} rejected"),
            },
            None => RemoteOutcome::Accepted,
        };

        if outcome == RemoteOutcome::Accepted && !state.applied.contains_key(entry_id) {
            state
                .applied
                .insert(entry_id.to_string(), (target.clone(), payload.to_string()));
            state.order.push(entry_id.to_string());
        }
        outcome
    }
}
