//! Delivery of queued mutations to the remote system.

pub mod reconciler;
pub mod remote;
pub mod worker;

pub use reconciler::{ReconcileReport, Reconciler, reconcile};
pub use remote::{InMemoryRemote, RemoteEndpoint, RemoteOutcome};
pub use worker::{SyncSignal, SyncWorker, spawn_sync_worker};
