//! Field-level last-write-wins merge of local state against a pulled blob.
//!
//! For progress, notes and times every key is decided on its own by comparing
//! last-modified stamps. A stamp beats a missing stamp; equal stamps with
//! different values are a tie and are reported instead of being resolved.
//! Stars follow the local side only while it has unsynced star edits.
//! Repo sources are a local preference: local entries always win and remote
//! entries are only added when this device never removed them.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{LastModifiedMap, MapField, RepoSource, SyncBlob};
use crate::store::LocalSnapshot;

/// A key whose local and remote values tie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConflictKey {
    pub field: MapField,
    pub id: String,
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Carries the remote's version and timestamp; the pusher bumps both
    pub merged: SyncBlob,
    /// Tied keys, sorted. The merged blob holds the local value for each.
    pub ties: Vec<ConflictKey>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.ties.is_empty()
    }
}

/// How the user chose to settle a tie conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep every local map, discarding remote values
    UseLocal,
    /// Take every remote map, discarding local values
    UseRemote,
    /// Keep the per-key merge; ties keep the local value
    Merge,
}

impl std::str::FromStr for Resolution {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "use-local" => Ok(Resolution::UseLocal),
            "remote" | "use-remote" => Ok(Resolution::UseRemote),
            "merge" => Ok(Resolution::Merge),
            _ => Err(format!("unknown resolution: {s} (valid: local, remote, merge)")),
        }
    }
}

/// Both candidates of an unresolved merge plus the keys that tied.
#[derive(Debug, Clone)]
pub struct ConflictReport {
    pub local: SyncBlob,
    pub remote: SyncBlob,
    pub merged: SyncBlob,
    pub keys: Vec<ConflictKey>,
}

impl ConflictReport {
    /// The blob to push for a resolution. Its version is the pulled remote
    /// version.
    pub fn resolve(&self, resolution: Resolution) -> SyncBlob {
        match resolution {
            Resolution::UseLocal => SyncBlob {
                version: self.remote.version,
                timestamp: self.remote.timestamp.clone(),
                repo_sources: self.merged.repo_sources.clone(),
                ..self.local.clone()
            },
            Resolution::UseRemote => self.remote.clone(),
            Resolution::Merge => self.merged.clone(),
        }
    }
}

pub fn merge(local: &LocalSnapshot, remote: &SyncBlob) -> MergeOutcome {
    let mut ties = Vec::new();
    let ours = &local.blob;

    let (progress, progress_last_modified) = merge_field(
        MapField::Progress,
        (&ours.progress, &ours.progress_last_modified),
        (&remote.progress, &remote.progress_last_modified),
        &mut ties,
    );
    let (notes, notes_last_modified) = merge_field(
        MapField::Notes,
        (&ours.notes, &ours.notes_last_modified),
        (&remote.notes, &remote.notes_last_modified),
        &mut ties,
    );
    let (times, times_last_modified) = merge_field(
        MapField::Times,
        (&ours.times, &ours.times_last_modified),
        (&remote.times, &remote.times_last_modified),
        &mut ties,
    );

    let stars = if local.stars_dirty {
        ours.stars.clone()
    } else {
        remote.stars.clone()
    };

    let repo_sources = merge_sources(
        &ours.repo_sources,
        &remote.repo_sources,
        &local.removed_source_ids,
    );

    ties.sort();
    if !ties.is_empty() {
        tracing::info!("Merge found {} tied key(s)", ties.len());
    }

    MergeOutcome {
        merged: SyncBlob {
            version: remote.version,
            timestamp: remote.timestamp.clone(),
            progress,
            progress_last_modified,
            notes,
            notes_last_modified,
            stars,
            repo_sources,
            times,
            times_last_modified,
        },
        ties,
    }
}

enum Winner {
    Local,
    Remote,
    Tie,
}

fn merge_field<V: Clone + PartialEq>(
    field: MapField,
    (local_values, local_lm): (&BTreeMap<String, V>, &LastModifiedMap),
    (remote_values, remote_lm): (&BTreeMap<String, V>, &LastModifiedMap),
    ties: &mut Vec<ConflictKey>,
) -> (BTreeMap<String, V>, LastModifiedMap) {
    let keys: BTreeSet<&String> = local_values
        .keys()
        .chain(local_lm.keys())
        .chain(remote_values.keys())
        .chain(remote_lm.keys())
        .collect();

    let mut values = BTreeMap::new();
    let mut last_modified = LastModifiedMap::new();

    for key in keys {
        let local_value = local_values.get(key);
        let remote_value = remote_values.get(key);
        let local_ts = local_lm.get(key).copied();
        let remote_ts = remote_lm.get(key).copied();

        // `None` orders below any stamp
        let winner = match local_ts.cmp(&remote_ts) {
            std::cmp::Ordering::Greater => Winner::Local,
            std::cmp::Ordering::Less => Winner::Remote,
            std::cmp::Ordering::Equal if local_value == remote_value => Winner::Local,
            std::cmp::Ordering::Equal => match (local_value, remote_value) {
                // Unstamped on both sides and present on one: that side wins
                (Some(_), None) if local_ts.is_none() => Winner::Local,
                (None, Some(_)) if local_ts.is_none() => Winner::Remote,
                _ => Winner::Tie,
            },
        };

        let (value, ts) = match winner {
            Winner::Local => (local_value, local_ts),
            Winner::Remote => (remote_value, remote_ts),
            Winner::Tie => {
                tracing::debug!("Tie on {}:{} at {:?}", field, key, local_ts);
                ties.push(ConflictKey {
                    field,
                    id: key.clone(),
                });
                (local_value, local_ts)
            }
        };

        if let Some(value) = value {
            values.insert(key.clone(), value.clone());
        }
        if let Some(ts) = ts {
            last_modified.insert(key.clone(), ts);
        }
    }

    (values, last_modified)
}

fn merge_sources(
    local: &[RepoSource],
    remote: &[RepoSource],
    removed: &BTreeSet<String>,
) -> Vec<RepoSource> {
    let mut merged = local.to_vec();
    for source in remote {
        if merged.iter().any(|s| s.id == source.id) {
            continue;
        }
        if removed.contains(&source.id) && !source.is_builtin {
            continue;
        }
        merged.push(source.clone());
    }
    merged
}
