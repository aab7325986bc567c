use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as Days, TimeZone, Utc};
use spaced_sync::config::{SchedulerConfig, SyncConfig};
use spaced_sync::export::json::{export_json, import_json};
use spaced_sync::models::ReviewRecord;
use spaced_sync::sync::{InMemoryRemote, Reconciler, spawn_sync_worker};
use spaced_sync::{Database, ItemStatus, ReviewEngine};

fn sync_config() -> SyncConfig {
    SyncConfig {
        batch_size: 2,
        interval_secs: 3600,
    }
}

async fn wait_until_drained(db: &Database) {
    for _ in 0..200 {
        if db.queue().is_empty().unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue was not drained");
}

#[tokio::test]
async fn reviews_made_offline_reach_the_remote_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reviews.sqlite3");
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    {
        let db = Database::open(&path).unwrap();
        let engine = ReviewEngine::new(&db, SchedulerConfig::default());
        engine.record_review_at("dom", 4, start).unwrap();
        engine.record_review_at("kot", 3, start).unwrap();
        engine.record_review_at("dom", 5, start + Days::days(1)).unwrap();
        assert_eq!(db.queue().len().unwrap(), 3);
    }

    // The app restarts while still offline.
    let db = Database::open(&path).unwrap();
    assert_eq!(db.queue().pending_count().unwrap(), 3);

    let remote = Arc::new(InMemoryRemote::new());
    remote.set_offline(true);
    let reconciler = Arc::new(Reconciler::new(db.queue(), remote.clone(), &sync_config()));
    let worker = spawn_sync_worker(reconciler, sync_config().interval());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(db.queue().len().unwrap(), 3);
    assert!(remote.applied_ids().is_empty());

    remote.set_offline(false);
    worker.connectivity_restored();
    wait_until_drained(&db).await;
    worker.shutdown().await;

    assert_eq!(remote.applied_ids().len(), 3);
    assert_eq!(db.queue().dead_letter_count().unwrap(), 0);

    // The last delivered mutation for an item carries its latest state.
    let last_dom = remote
        .applied_ids()
        .into_iter()
        .filter_map(|id| remote.payload(&id))
        .filter_map(|p| serde_json::from_str::<ReviewRecord>(&p).ok())
        .filter(|r| r.item_id == "dom")
        .last()
        .unwrap();
    assert_eq!(last_dom, db.records().get("dom").unwrap().unwrap());
    assert_eq!(last_dom.status, ItemStatus::Review);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reconcilers_confirm_each_entry_once() {
    let db = Database::open_in_memory().unwrap();
    let engine = ReviewEngine::new(&db, SchedulerConfig::default());
    for item in ["a", "b", "c", "d", "e"] {
        engine.record_review(item, 5).unwrap();
    }

    let remote = Arc::new(InMemoryRemote::new());
    let first = Reconciler::new(db.queue(), remote.clone(), &sync_config());
    let second = Reconciler::new(db.queue(), remote.clone(), &sync_config());

    let (left, right) = tokio::join!(first.reconcile(), second.reconcile());
    let mut confirmed = left.unwrap().confirmed;
    confirmed.extend(right.unwrap().confirmed);
    confirmed.sort();

    let mut applied = remote.applied_ids();
    applied.sort();

    assert_eq!(confirmed.len(), 5);
    assert_eq!(confirmed, applied);
    assert!(db.queue().is_empty().unwrap());
    assert!(first.reconcile().await.unwrap().is_empty());
}

#[test]
fn exported_snapshot_restores_identical_records() {
    let source = Database::open_in_memory().unwrap();
    let engine = ReviewEngine::new(&source, SchedulerConfig::default());
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    for (day, quality) in [4, 5, 5, 1, 4].into_iter().enumerate() {
        engine
            .record_review_at("słowo", quality, start + Days::days(day as i64))
            .unwrap();
    }

    let json = export_json(&source, true).unwrap();
    let target = Database::open_in_memory().unwrap();
    import_json(&target, &json).unwrap();

    let before = serde_json::to_string(&source.records().all().unwrap()).unwrap();
    let after = serde_json::to_string(&target.records().all().unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(target.queue().len().unwrap(), 5);
}
