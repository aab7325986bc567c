//! Background task that runs reconciliation passes on a timer and whenever
//! connectivity comes back.

use super::reconciler::Reconciler;
use super::remote::RemoteEndpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Messages that drive the sync worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// The device is online again; run a pass now.
    ConnectivityRestored,
    /// Stop the worker, cancelling a pass in progress.
    Shutdown,
}

/// Handle to a running sync worker. Dropping it stops the worker.
pub struct SyncWorker {
    sender: mpsc::Sender<SyncSignal>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    pub fn connectivity_restored(&self) {
        let _ = self.sender.try_send(SyncSignal::ConnectivityRestored);
    }

    /// Sender for external signal producers such as a network monitor.
    pub fn sender(&self) -> mpsc::Sender<SyncSignal> {
        self.sender.clone()
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.sender.send(SyncSignal::Shutdown).await;
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "sync worker ended abnormally");
        }
    }
}

/// Spawns the worker on the current tokio runtime. The first pass runs
/// immediately.
pub fn spawn_sync_worker<R>(reconciler: Arc<Reconciler<R>>, interval: Duration) -> SyncWorker
where
    R: RemoteEndpoint + 'static,
{
    let (sender, receiver) = mpsc::channel(32);
    let handle = tokio::spawn(worker_loop(reconciler, interval, receiver));
    SyncWorker { sender, handle }
}

async fn worker_loop<R: RemoteEndpoint>(
    reconciler: Arc<Reconciler<R>>,
    interval: Duration,
    mut receiver: mpsc::Receiver<SyncSignal>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut run_now = false;

    loop {
        if !run_now {
            tokio::select! {
                _ = ticker.tick() => {}
                signal = receiver.recv() => match signal {
                    Some(SyncSignal::ConnectivityRestored) => {
                        tracing::debug!("connectivity restored; starting sync pass");
                    }
                    Some(SyncSignal::Shutdown) | None => break,
                },
            }
        }
        run_now = false;

        let pass = reconciler.reconcile();
        tokio::pin!(pass);
        let stop = loop {
            tokio::select! {
                result = &mut pass => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "sync pass failed");
                    }
                    break false;
                }
                signal = receiver.recv() => match signal {
                    // Entries queued after the pass began need another pass.
                    Some(SyncSignal::ConnectivityRestored) => run_now = true,
                    Some(SyncSignal::Shutdown) | None => break true,
                },
            }
        };
        if stop {
            tracing::info!("sync worker stopping; unconfirmed entries stay pending");
            break;
        }
    }
}
