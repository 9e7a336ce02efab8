use thiserror::Error;

use crate::merge::ConflictKey;

/// Failures of the sync and catalog paths.
///
/// Local mutations never produce one of these; everything here comes from
/// talking to a remote or from resolving what came back.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote data did not match the expected schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport failure or non-success response
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Push raced another writer
    #[error("Version conflict: expected remote version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// Equal timestamps with differing values; needs a user decision
    #[error("Merge conflict on {} key(s)", keys.len())]
    MergeConflict { keys: Vec<ConflictKey> },

    #[error("No conflict is waiting for resolution")]
    NoPendingConflict,

    /// A newer catalog load started before this one finished
    #[error("Catalog load superseded by a newer source set")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Network(format!("request timed out: {}", e))
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Storage(format!("{:#}", e))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
