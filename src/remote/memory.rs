use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::traits::{PutOutcome, RemoteDocument, RemoteStore};
use crate::error::{Result, SyncError};
use crate::model::SyncBlob;

/// In-process remote with the same optimistic-version rules as the real
/// endpoint, plus knobs to inject failures and racing writers.
#[derive(Default)]
pub struct MemoryRemote {
    document: Mutex<Option<RemoteDocument>>,
    fail_fetches: AtomicUsize,
    fail_puts: AtomicUsize,
    racing_puts: AtomicUsize,
    fetches: AtomicUsize,
    writes: AtomicUsize,
    latency: Mutex<Duration>,
    puts_in_flight: AtomicUsize,
    max_puts_in_flight: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the remote with a blob at its own version.
    pub fn with_blob(blob: SyncBlob) -> Self {
        let remote = Self::new();
        remote.set_raw(blob.version, blob_value(&blob));
        remote
    }

    /// Store an arbitrary, possibly invalid, document.
    pub fn set_raw(&self, version: u64, blob: serde_json::Value) {
        *self.document.lock() = Some(RemoteDocument { version, blob });
    }

    pub fn version(&self) -> u64 {
        self.document.lock().as_ref().map_or(0, |d| d.version)
    }

    /// The stored blob, if it parses.
    pub fn blob(&self) -> Option<SyncBlob> {
        let doc = self.document.lock();
        doc.as_ref()
            .and_then(|d| serde_json::from_value(d.blob.clone()).ok())
    }

    /// The next `n` fetches fail with a network error.
    pub fn fail_next_fetches(&self, n: usize) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    /// The next `n` puts fail with a network error.
    pub fn fail_next_puts(&self, n: usize) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Before each of the next `n` puts, another device writes first.
    pub fn race_next_puts(&self, n: usize) {
        self.racing_puts.store(n, Ordering::SeqCst);
    }

    /// Every fetch and put takes this long.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Highest number of puts that were ever running at once.
    pub fn max_concurrent_puts(&self) -> usize {
        self.max_puts_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Successful writes, racing writers excluded.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn blob_value(blob: &SyncBlob) -> serde_json::Value {
    serde_json::to_value(blob).unwrap_or(serde_json::Value::Null)
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self) -> Result<RemoteDocument> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if take_one(&self.fail_fetches) {
            return Err(SyncError::Network("injected fetch failure".to_string()));
        }
        Ok(self
            .document
            .lock()
            .clone()
            .unwrap_or_else(RemoteDocument::unwritten))
    }

    async fn put(&self, expected_version: u64, blob: &SyncBlob) -> Result<PutOutcome> {
        let in_flight = self.puts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_puts_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.simulate_latency().await;
        let outcome = self.apply_put(expected_version, blob);
        self.puts_in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl MemoryRemote {
    fn apply_put(&self, expected_version: u64, blob: &SyncBlob) -> Result<PutOutcome> {
        if take_one(&self.fail_puts) {
            return Err(SyncError::Network("injected put failure".to_string()));
        }

        let mut doc = self.document.lock();
        let current = doc.clone().unwrap_or_else(RemoteDocument::unwritten);

        if take_one(&self.racing_puts) {
            let mut blob = current.blob.clone();
            if let Some(obj) = blob.as_object_mut() {
                obj.insert("version".to_string(), (current.version + 1).into());
            }
            *doc = Some(RemoteDocument {
                version: current.version + 1,
                blob,
            });
            return Ok(PutOutcome::VersionConflict {
                current_version: current.version + 1,
            });
        }

        if current.version != expected_version {
            return Ok(PutOutcome::VersionConflict {
                current_version: current.version,
            });
        }

        let version = expected_version + 1;
        let stored = SyncBlob {
            version,
            ..blob.clone()
        };
        *doc = Some(RemoteDocument {
            version,
            blob: blob_value(&stored),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(PutOutcome::Written { version })
    }
}
