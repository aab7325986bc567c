//! Pending remote mutations recorded while offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Method semantics of a remote operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMethod {
    /// Create or replace the resource at `path`.
    Put,
    /// Remove the resource at `path`.
    Delete,
}

impl SyncMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Abstract descriptor of the remote operation an entry performs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub method: SyncMethod,
    pub path: String,
}

impl SyncTarget {
    /// Upsert of a single review record on the remote side.
    pub fn put_record(item_id: &str) -> Self {
        Self {
            method: SyncMethod::Put,
            path: format!("/review-records/{item_id}"),
        }
    }
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)
    }
}

/// Delivery state of a queued entry.
///
/// `Pending -> InFlight -> {removed on confirmation, Pending on failure}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    InFlight,
}

impl EntryState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            _ => None,
        }
    }
}

/// A remote-bound mutation waiting in the offline queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Position in the queue; assigned by the store, not carried across export.
    #[serde(skip)]
    pub seq: i64,
    /// Idempotency key sent with every delivery attempt.
    pub entry_id: String,
    /// Ordering key: entries of one item are delivered in enqueue order.
    pub item_id: String,
    pub target: SyncTarget,
    /// Serialized mutation body.
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip, default = "pending")]
    pub state: EntryState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn pending() -> EntryState {
    EntryState::Pending
}

/// An entry the remote rejected permanently, kept for inspection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub entry: SyncQueueEntry,
    pub failed_at: DateTime<Utc>,
    pub reason: String,
}
