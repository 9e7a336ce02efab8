use async_trait::async_trait;

use crate::error::Result;
use crate::model::SyncBlob;

/// What the remote endpoint holds: a version and an unvalidated blob.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub version: u64,
    /// `Null` when nothing was ever written
    pub blob: serde_json::Value,
}

impl RemoteDocument {
    pub fn unwritten() -> Self {
        Self {
            version: 0,
            blob: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written { version: u64 },
    /// Nothing was written; the remote is at `current_version`
    VersionConflict { current_version: u64 },
}

/// Trait for the opaque, versioned blob store holding synced state
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the current document.
    async fn fetch(&self) -> Result<RemoteDocument>;

    /// Write `blob` only if the remote is still at `expected_version`.
    /// Must not write anything on a version mismatch.
    async fn put(&self, expected_version: u64, blob: &SyncBlob) -> Result<PutOutcome>;
}
