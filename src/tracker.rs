//! Turns local edits into sync cycles.
//!
//! The tracker waits for the store's revision to change, then for a quiet
//! window of `debounce` with no further changes, then runs one cycle. Edits
//! that land while a cycle is in flight mark the revision as changed again,
//! which yields exactly one follow-up cycle however many edits there were.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sync::SyncEngine;

pub struct ChangeTracker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ChangeTracker {
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>, debounce: Duration) -> Self {
        // Subscribe before returning so edits made right after spawn are seen
        let changes = engine.store().subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(engine, changes, debounce, cancel.clone()));
        tracing::debug!("Change tracker started (debounce {:?})", debounce);
        Self { cancel, handle }
    }

    /// Drop any pending (not yet started) cycle and stop. A cycle already in
    /// flight finishes first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Change tracker task ended abnormally: {}", e);
        }
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    mut changes: watch::Receiver<u64>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        // Quiet window; each new change restarts it
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(debounce) => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let revision = *changes.borrow_and_update();
        tracing::debug!("Local changes settled at revision {}", revision);
        if let Err(e) = engine.sync_now().await {
            tracing::debug!("Triggered sync failed: {}", e);
        }
    }
    tracing::debug!("Change tracker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use crate::remote::{MemoryRemote, RetryPolicy, SyncAdapter};
    use crate::storage::MemoryStorage;
    use crate::store::{LocalStore, ManualClock};

    fn engine(remote: Arc<MemoryRemote>) -> Arc<SyncEngine> {
        let store = Arc::new(LocalStore::hydrate(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(1_000)),
        ));
        Arc::new(SyncEngine::new(
            store,
            SyncAdapter::new(remote, RetryPolicy::none()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_yields_one_cycle() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(remote.clone());
        let tracker = ChangeTracker::spawn(engine.clone(), Duration::from_secs(1));

        for i in 0..5 {
            engine.store().set_status(&format!("q{i}"), Status::Mastered);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(remote.fetch_count(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(remote.write_count(), 1);
        assert_eq!(remote.blob().unwrap().progress.len(), 5);

        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_during_push_trigger_one_follow_up() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(500));
        let engine = engine(remote.clone());
        let tracker = ChangeTracker::spawn(engine.clone(), Duration::from_millis(100));

        engine.store().set_note("q1", "first");
        // Cycle pulls from 100ms to 600ms, then pushes until 1100ms
        tokio::time::sleep(Duration::from_millis(700)).await;
        engine.store().set_note("q2", "second");
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.store().set_note("q3", "third");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.fetch_count(), 2);
        assert_eq!(remote.write_count(), 2);
        assert_eq!(remote.max_concurrent_puts(), 1);
        assert_eq!(remote.blob().unwrap().notes.len(), 3);

        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sync_and_tracker_never_push_concurrently() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(300));
        let engine = engine(remote.clone());
        let tracker = ChangeTracker::spawn(engine.clone(), Duration::from_millis(50));

        engine.store().add_time("q1", 30);
        tokio::time::sleep(Duration::from_millis(400)).await;
        engine.store().add_time("q2", 45);
        let _ = engine.sync_now().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.max_concurrent_puts(), 1);
        let stored = remote.blob().unwrap();
        assert_eq!(stored.times["q1"], 30);
        assert_eq!(stored.times["q2"], 45);

        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_cycle() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(remote.clone());
        let tracker = ChangeTracker::spawn(engine.clone(), Duration::from_secs(2));

        engine.store().toggle_star("q1");
        tokio::time::sleep(Duration::from_millis(500)).await;
        tracker.shutdown().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absorbing_remote_state_does_not_retrigger() {
        let mut seeded = crate::model::SyncBlob::empty();
        seeded.version = 3;
        seeded.progress.insert("q9".to_string(), Status::Failed);
        seeded.progress_last_modified.insert("q9".to_string(), 5);
        let remote = Arc::new(MemoryRemote::with_blob(seeded));
        let engine = engine(remote.clone());
        let tracker = ChangeTracker::spawn(engine.clone(), Duration::from_millis(100));

        engine.store().set_status("q1", Status::Confused);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(engine.store().status("q9"), Status::Failed);

        tracker.shutdown().await;
    }
}
