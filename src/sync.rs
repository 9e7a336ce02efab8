//! One pull -> merge -> push cycle, and what happens around it.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::error::{Result, SyncError};
use crate::merge::{merge, ConflictReport, Resolution};
use crate::remote::{PushOutcome, SyncAdapter};
use crate::store::LocalStore;

/// Extra full cycles after a push loses a version race
const VERSION_CONFLICT_RETRIES: u32 = 1;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Merged state was written as `version`
    Pushed { version: u64 },
    /// Remote already held the merged state; nothing was written
    UpToDate { version: u64 },
    /// Tie conflicts; nothing was written and the caller must resolve
    Conflict(Arc<ConflictReport>),
}

/// What a sync status indicator shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced { version: u64 },
    Conflict,
    Error(String),
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Pushed { version: u64 },
    UpToDate { version: u64 },
    Conflict(Arc<ConflictReport>),
    Failed(String),
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    adapter: SyncAdapter,
    /// Held for the whole cycle: at most one push in flight
    push_lock: tokio::sync::Mutex<()>,
    pending_conflict: Mutex<Option<Arc<ConflictReport>>>,
    events: broadcast::Sender<SyncEvent>,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(store: Arc<LocalStore>, adapter: SyncAdapter) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            adapter,
            push_lock: tokio::sync::Mutex::new(()),
            pending_conflict: Mutex::new(None),
            events,
            status,
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn pending_conflict(&self) -> Option<Arc<ConflictReport>> {
        self.pending_conflict.lock().clone()
    }

    /// Run one sync cycle. Waits if another cycle is in flight.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        let _guard = self.push_lock.lock().await;
        self.status.send_replace(SyncStatus::Syncing);
        let _ = self.events.send(SyncEvent::Started);

        let result = self.run_cycle().await;
        self.report(&result);
        result
    }

    /// Settle the pending tie conflict. `UseRemote` adopts the pulled remote
    /// state locally; the other choices push under the pulled version.
    pub async fn resolve_conflict(&self, resolution: Resolution) -> Result<SyncOutcome> {
        let _guard = self.push_lock.lock().await;
        let report = self
            .pending_conflict
            .lock()
            .take()
            .ok_or(SyncError::NoPendingConflict)?;

        tracing::info!(
            "Resolving conflict on {} key(s) with {:?}",
            report.keys.len(),
            resolution
        );
        self.status.send_replace(SyncStatus::Syncing);

        let result = match resolution {
            Resolution::UseRemote => {
                self.store.adopt(&report.remote);
                Ok(SyncOutcome::UpToDate {
                    version: report.remote.version,
                })
            }
            Resolution::UseLocal | Resolution::Merge => {
                let blob = report.resolve(resolution);
                match self.adapter.push(&blob, report.remote.version).await {
                    Ok(PushOutcome::Pushed { version }) => {
                        self.store.absorb(&blob, &report.local.stars, version);
                        Ok(SyncOutcome::Pushed { version })
                    }
                    Ok(PushOutcome::VersionConflict { expected, actual }) => {
                        Err(SyncError::VersionConflict { expected, actual })
                    }
                    Err(e) => {
                        // Still resolvable once the network is back
                        *self.pending_conflict.lock() = Some(report.clone());
                        Err(e)
                    }
                }
            }
        };

        self.report(&result);
        result
    }

    async fn run_cycle(&self) -> Result<SyncOutcome> {
        let mut retries = 0;
        loop {
            // Always pull first: never merge against a cached remote
            let remote = self.adapter.pull().await?;
            let local = self.store.snapshot();
            let outcome = merge(&local, &remote);

            if !outcome.is_clean() {
                let report = Arc::new(ConflictReport {
                    local: local.blob,
                    remote,
                    merged: outcome.merged,
                    keys: outcome.ties,
                });
                *self.pending_conflict.lock() = Some(report.clone());
                return Ok(SyncOutcome::Conflict(report));
            }
            *self.pending_conflict.lock() = None;

            if outcome.merged.same_content(&remote) {
                tracing::debug!("Remote already up to date at version {}", remote.version);
                self.store
                    .absorb(&outcome.merged, &local.blob.stars, remote.version);
                return Ok(SyncOutcome::UpToDate {
                    version: remote.version,
                });
            }

            match self.adapter.push(&outcome.merged, remote.version).await? {
                PushOutcome::Pushed { version } => {
                    self.store
                        .absorb(&outcome.merged, &local.blob.stars, version);
                    return Ok(SyncOutcome::Pushed { version });
                }
                PushOutcome::VersionConflict { expected, actual } => {
                    if retries >= VERSION_CONFLICT_RETRIES {
                        return Err(SyncError::VersionConflict { expected, actual });
                    }
                    retries += 1;
                    tracing::info!("Lost a version race, rerunning the sync cycle");
                }
            }
        }
    }

    fn report(&self, result: &Result<SyncOutcome>) {
        let (status, event) = match result {
            Ok(SyncOutcome::Pushed { version }) => (
                SyncStatus::Synced { version: *version },
                SyncEvent::Pushed { version: *version },
            ),
            Ok(SyncOutcome::UpToDate { version }) => (
                SyncStatus::Synced { version: *version },
                SyncEvent::UpToDate { version: *version },
            ),
            Ok(SyncOutcome::Conflict(report)) => {
                (SyncStatus::Conflict, SyncEvent::Conflict(report.clone()))
            }
            Err(e) => {
                tracing::warn!("Sync failed: {}", e);
                (SyncStatus::Error(e.to_string()), SyncEvent::Failed(e.to_string()))
            }
        };
        self.status.send_replace(status);
        let _ = self.events.send(event);
    }
}
