use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{LastModifiedMap, NoteMap, ProgressMap, RepoSource, StarMap, TimeMap};

/// Storage key of the local state document
pub const STATE_KEY: &str = "study-sync:state";

/// Shared prefix of every draft entry
pub const DRAFT_PREFIX: &str = "study-sync:draft:";

/// Set once legacy drafts have been absorbed
pub const DRAFTS_MIGRATED_KEY: &str = "study-sync:drafts-migrated";

/// The durable local state, persisted as one JSON document under
/// [`STATE_KEY`].
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub progress: ProgressMap,
    #[serde(default)]
    pub progress_last_modified: LastModifiedMap,
    #[serde(default)]
    pub notes: NoteMap,
    #[serde(default)]
    pub notes_last_modified: LastModifiedMap,
    #[serde(default)]
    pub times: TimeMap,
    #[serde(default)]
    pub times_last_modified: LastModifiedMap,
    #[serde(default)]
    pub stars: StarMap,

    #[serde(default)]
    pub repo_sources: Vec<RepoSource>,
    /// Ids of sources removed on this device; a remote blob may not bring
    /// them back
    #[serde(default)]
    pub removed_source_ids: BTreeSet<String>,

    /// Filter/UI preferences, opaque to the engine and never synced
    #[serde(default)]
    pub preferences: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub sync: SyncMeta,
}

/// What the store knows about its last successful sync.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    #[serde(default)]
    pub last_synced_version: Option<u64>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// SHA-256 of the star map as it was after the last sync
    #[serde(default)]
    pub synced_stars_digest: Option<String>,
}
