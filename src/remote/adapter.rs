use chrono::Utc;
use std::sync::Arc;

use super::retry::RetryPolicy;
use super::schema::parse_remote_blob;
use super::traits::{PutOutcome, RemoteStore};
use crate::error::Result;
use crate::model::SyncBlob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed { version: u64 },
    VersionConflict { expected: u64, actual: u64 },
}

/// Pull/push on top of a [`RemoteStore`], with validation, per-attempt
/// timeouts and bounded retry of network failures.
pub struct SyncAdapter {
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
}

impl SyncAdapter {
    pub fn new(remote: Arc<dyn RemoteStore>, retry: RetryPolicy) -> Self {
        Self { remote, retry }
    }

    /// Fetch and validate the remote blob. An absent blob, or one that fails
    /// validation, comes back empty at the envelope's version so the next push
    /// overwrites it. Only network failures are errors.
    pub async fn pull(&self) -> Result<SyncBlob> {
        let document = self.retry.run("pull", || self.remote.fetch()).await?;

        if document.blob.is_null() {
            tracing::debug!("Remote has no blob yet (version {})", document.version);
            return Ok(SyncBlob {
                version: document.version,
                ..SyncBlob::empty()
            });
        }

        match parse_remote_blob(&document.blob) {
            Ok(blob) => {
                if blob.version != document.version {
                    tracing::debug!(
                        "Remote envelope version {} differs from blob version {}",
                        document.version,
                        blob.version
                    );
                }
                tracing::info!("Pulled remote blob at version {}", blob.version);
                Ok(SyncBlob {
                    version: document.version,
                    ..blob
                })
            }
            Err(e) => {
                tracing::warn!("Remote blob failed validation, treating as empty: {}", e);
                Ok(SyncBlob {
                    version: document.version,
                    ..SyncBlob::empty()
                })
            }
        }
    }

    /// Write `blob` if the remote is still at `expected_version`. The stored
    /// blob gets version `expected_version + 1` and a fresh timestamp.
    pub async fn push(&self, blob: &SyncBlob, expected_version: u64) -> Result<PushOutcome> {
        let outgoing = SyncBlob {
            version: expected_version + 1,
            timestamp: Utc::now().to_rfc3339(),
            ..blob.clone()
        };

        let outcome = self
            .retry
            .run("push", || self.remote.put(expected_version, &outgoing))
            .await?;

        match outcome {
            PutOutcome::Written { version } => {
                tracing::info!("Pushed blob as version {}", version);
                Ok(PushOutcome::Pushed { version })
            }
            PutOutcome::VersionConflict { current_version } => {
                tracing::warn!(
                    "Push rejected: expected remote version {}, remote is at {}",
                    expected_version,
                    current_version
                );
                Ok(PushOutcome::VersionConflict {
                    expected: expected_version,
                    actual: current_version,
                })
            }
        }
    }
}
