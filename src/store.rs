//! The local, authoritative copy of a user's study state.
//!
//! Every UI mutation goes through [`LocalStore`]. Mutations are synchronous,
//! stamp the matching last-modified map with the current time, persist the
//! whole document through the storage backend, and then notify subscribers
//! (the change tracker) by bumping a revision counter.

use chrono::Utc;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::model::{
    LastModifiedMap, MapField, NoteMap, ProgressMap, RepoSource, StarMap, Status, SyncBlob,
    TimeMap,
};
use crate::storage::{KeyValueStore, PersistedState, SyncMeta, STATE_KEY};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Local state as handed to the merge engine.
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    /// Local maps in blob form; `version` is the last synced remote version
    pub blob: SyncBlob,
    /// Stars changed locally since the last sync
    pub stars_dirty: bool,
    pub removed_source_ids: BTreeSet<String>,
}

/// Digest of a star map, used to detect unsynced star edits.
pub fn stars_digest(stars: &StarMap) -> String {
    let mut hasher = Sha256::new();
    for (id, starred) in stars {
        hasher.update(id.as_bytes());
        hasher.update([0u8, *starred as u8]);
    }
    hex::encode(hasher.finalize())
}

pub struct LocalStore {
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<PersistedState>,
    changes: watch::Sender<u64>,
}

impl LocalStore {
    /// Load the persisted document, falling back to empty state if it is
    /// missing, unreadable or corrupt.
    pub fn hydrate(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let mut state = match backend.get(STATE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("Persisted state is corrupt, starting empty: {}", e);
                    PersistedState::default()
                }
            },
            Ok(None) => PersistedState::default(),
            Err(e) => {
                tracing::warn!("Failed to read persisted state, starting empty: {:#}", e);
                PersistedState::default()
            }
        };

        backfill_last_modified(&mut state);

        tracing::debug!(
            "Hydrated local store ({} progress, {} notes, {} times, {} stars)",
            state.progress.len(),
            state.notes.len(),
            state.times.len(),
            state.stars.len()
        );

        let (changes, _) = watch::channel(0);
        Self {
            backend,
            clock,
            state: RwLock::new(state),
            changes,
        }
    }

    pub fn progress(&self) -> ProgressMap {
        self.state.read().progress.clone()
    }

    pub fn status(&self, id: &str) -> Status {
        self.state
            .read()
            .progress
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    pub fn notes(&self) -> NoteMap {
        self.state.read().notes.clone()
    }

    pub fn times(&self) -> TimeMap {
        self.state.read().times.clone()
    }

    pub fn stars(&self) -> StarMap {
        self.state.read().stars.clone()
    }

    pub fn last_modified(&self, field: MapField) -> LastModifiedMap {
        let state = self.state.read();
        match field {
            MapField::Progress => state.progress_last_modified.clone(),
            MapField::Notes => state.notes_last_modified.clone(),
            MapField::Times => state.times_last_modified.clone(),
        }
    }

    pub fn repo_sources(&self) -> Vec<RepoSource> {
        self.state.read().repo_sources.clone()
    }

    pub fn sync_meta(&self) -> SyncMeta {
        self.state.read().sync.clone()
    }

    pub fn preference(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().preferences.get(key).cloned()
    }

    /// Subscribe to local changes of the four value maps. The value is a
    /// revision counter; only the fact that it changed matters.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// `Unanswered` removes the entry; the removal is stamped like any write.
    pub fn set_status(&self, id: &str, status: Status) {
        self.mutate(true, |state, now| {
            if status == Status::Unanswered {
                state.progress.remove(id);
            } else {
                state.progress.insert(id.to_string(), status);
            }
            stamp(&mut state.progress_last_modified, id, now);
        });
    }

    /// Empty text removes the note.
    pub fn set_note(&self, id: &str, text: &str) {
        self.mutate(true, |state, now| {
            if text.is_empty() {
                state.notes.remove(id);
            } else {
                state.notes.insert(id.to_string(), text.to_string());
            }
            stamp(&mut state.notes_last_modified, id, now);
        });
    }

    pub fn add_time(&self, id: &str, seconds: u64) {
        if seconds == 0 {
            return;
        }
        self.mutate(true, |state, now| {
            let total = state.times.entry(id.to_string()).or_insert(0);
            *total = total.saturating_add(seconds);
            stamp(&mut state.times_last_modified, id, now);
        });
    }

    /// Returns the new starred state.
    pub fn toggle_star(&self, id: &str) -> bool {
        let mut starred = false;
        self.mutate(true, |state, _| {
            if state.stars.remove(id).unwrap_or(false) {
                starred = false;
            } else {
                state.stars.insert(id.to_string(), true);
                starred = true;
            }
        });
        starred
    }

    /// Returns false if a source with the same id already exists.
    pub fn add_repo_source(&self, source: RepoSource) -> bool {
        let mut added = false;
        self.mutate(false, |state, _| {
            if state.repo_sources.iter().any(|s| s.id == source.id) {
                return;
            }
            state.removed_source_ids.remove(&source.id);
            state.repo_sources.push(source);
            added = true;
        });
        added
    }

    /// Builtin sources can't be removed.
    pub fn remove_repo_source(&self, id: &str) -> bool {
        let mut removed = false;
        self.mutate(false, |state, _| {
            let Some(pos) = state.repo_sources.iter().position(|s| s.id == id) else {
                return;
            };
            if state.repo_sources[pos].is_builtin {
                tracing::debug!("Refusing to remove builtin source {}", id);
                return;
            }
            state.repo_sources.remove(pos);
            state.removed_source_ids.insert(id.to_string());
            removed = true;
        });
        removed
    }

    pub fn set_repo_source_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut found = false;
        self.mutate(false, |state, _| {
            if let Some(source) = state.repo_sources.iter_mut().find(|s| s.id == id) {
                source.enabled = enabled;
                found = true;
            }
        });
        found
    }

    pub fn set_preference(&self, key: &str, value: serde_json::Value) {
        self.mutate(false, |state, _| {
            state.preferences.insert(key.to_string(), value);
        });
    }

    pub fn snapshot(&self) -> LocalSnapshot {
        let state = self.state.read();
        let stars_dirty = match &state.sync.synced_stars_digest {
            Some(digest) => *digest != stars_digest(&state.stars),
            None => !state.stars.is_empty(),
        };
        LocalSnapshot {
            blob: SyncBlob {
                version: state.sync.last_synced_version.unwrap_or(0),
                timestamp: Utc::now().to_rfc3339(),
                progress: state.progress.clone(),
                progress_last_modified: state.progress_last_modified.clone(),
                notes: state.notes.clone(),
                notes_last_modified: state.notes_last_modified.clone(),
                stars: state.stars.clone(),
                repo_sources: state.repo_sources.clone(),
                times: state.times.clone(),
                times_last_modified: state.times_last_modified.clone(),
            },
            stars_dirty,
            removed_source_ids: state.removed_source_ids.clone(),
        }
    }

    /// Take in a merged blob after a sync, key by key, only where the merged
    /// stamp is newer than the local one. Local edits made while the sync
    /// was in flight survive. `stars_baseline` is the star map the merge saw;
    /// merged stars are only taken if local stars still match it.
    ///
    /// Does not notify subscribers.
    pub fn absorb(&self, merged: &SyncBlob, stars_baseline: &StarMap, synced_version: u64) {
        self.mutate(false, |state, _| {
            absorb_map(
                &mut state.progress,
                &mut state.progress_last_modified,
                &merged.progress,
                &merged.progress_last_modified,
            );
            absorb_map(
                &mut state.notes,
                &mut state.notes_last_modified,
                &merged.notes,
                &merged.notes_last_modified,
            );
            absorb_map(
                &mut state.times,
                &mut state.times_last_modified,
                &merged.times,
                &merged.times_last_modified,
            );
            if state.stars == *stars_baseline {
                state.stars = merged.stars.clone();
            }
            absorb_sources(state, &merged.repo_sources);
            mark_synced(state, &merged.stars, synced_version);
        });
    }

    /// Replace every synced map with the remote's, discarding local values.
    /// Repo sources stay local. Does not notify subscribers.
    pub fn adopt(&self, remote: &SyncBlob) {
        self.mutate(false, |state, _| {
            state.progress = remote.progress.clone();
            state.progress_last_modified = remote.progress_last_modified.clone();
            state.notes = remote.notes.clone();
            state.notes_last_modified = remote.notes_last_modified.clone();
            state.times = remote.times.clone();
            state.times_last_modified = remote.times_last_modified.clone();
            state.stars = remote.stars.clone();
            backfill_last_modified(state);
            absorb_sources(state, &remote.repo_sources);
            mark_synced(state, &remote.stars, remote.version);
        });
    }

    fn mutate<F>(&self, notify: bool, f: F)
    where
        F: FnOnce(&mut PersistedState, i64),
    {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.write();
            f(&mut state, now);
            self.persist(&state);
        }
        if notify {
            self.changes.send_modify(|rev| *rev = rev.wrapping_add(1));
        }
    }

    fn persist(&self, state: &PersistedState) {
        let result = serde_json::to_string(state)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.backend.set(STATE_KEY, &json));
        if let Err(e) = result {
            tracing::warn!("Failed to persist local state: {:#}", e);
        }
    }
}

/// Stamps never move backwards, even if the wall clock does.
fn stamp(last_modified: &mut LastModifiedMap, id: &str, now: i64) {
    let entry = last_modified.entry(id.to_string()).or_insert(now);
    *entry = (*entry).max(now);
}

/// Every value needs a stamp; values that predate stamping get 0 so any
/// stamped write beats them.
fn backfill_last_modified(state: &mut PersistedState) {
    for id in state.progress.keys() {
        state.progress_last_modified.entry(id.clone()).or_insert(0);
    }
    for id in state.notes.keys() {
        state.notes_last_modified.entry(id.clone()).or_insert(0);
    }
    for id in state.times.keys() {
        state.times_last_modified.entry(id.clone()).or_insert(0);
    }
}

fn absorb_map<V: Clone + PartialEq>(
    values: &mut std::collections::BTreeMap<String, V>,
    last_modified: &mut LastModifiedMap,
    merged_values: &std::collections::BTreeMap<String, V>,
    merged_last_modified: &LastModifiedMap,
) {
    let keys: BTreeSet<&String> = merged_values
        .keys()
        .chain(merged_last_modified.keys())
        .collect();

    for key in keys {
        let merged_ts = merged_last_modified.get(key).copied();
        let local_ts = last_modified.get(key).copied();
        let newer = match (merged_ts, local_ts) {
            (Some(m), Some(l)) => m > l,
            (Some(_), None) => true,
            (None, None) => !values.contains_key(key) && merged_values.contains_key(key),
            (None, Some(_)) => false,
        };
        if !newer {
            continue;
        }
        match merged_values.get(key) {
            Some(value) => {
                values.insert(key.clone(), value.clone());
            }
            None => {
                values.remove(key);
            }
        }
        last_modified.insert(key.clone(), merged_ts.unwrap_or(0));
    }
}

fn absorb_sources(state: &mut PersistedState, incoming: &[RepoSource]) {
    for source in incoming {
        let known = state.repo_sources.iter().any(|s| s.id == source.id);
        if !known && !state.removed_source_ids.contains(&source.id) {
            state.repo_sources.push(source.clone());
        }
    }
}

fn mark_synced(state: &mut PersistedState, synced_stars: &StarMap, version: u64) {
    state.sync.last_synced_version = Some(version);
    state.sync.last_synced_at = Some(Utc::now());
    state.sync.synced_stars_digest = Some(stars_digest(synced_stars));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store_at(ms: i64) -> (LocalStore, Arc<ManualClock>, Arc<MemoryStorage>) {
        let backend = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(ms));
        let store = LocalStore::hydrate(backend.clone(), clock.clone());
        (store, clock, backend)
    }

    #[test]
    fn test_set_status_stamps_last_modified() {
        let (store, clock, _) = store_at(100);
        store.set_status("q1", Status::Mastered);
        clock.set(250);
        store.set_status("q2", Status::Confused);

        assert_eq!(store.status("q1"), Status::Mastered);
        assert_eq!(store.status("q3"), Status::Unanswered);
        let lm = store.last_modified(MapField::Progress);
        assert_eq!(lm.get("q1"), Some(&100));
        assert_eq!(lm.get("q2"), Some(&250));
    }

    #[test]
    fn test_unanswered_removes_value_but_keeps_stamp() {
        let (store, clock, _) = store_at(100);
        store.set_status("q1", Status::Failed);
        clock.set(200);
        store.set_status("q1", Status::Unanswered);

        assert!(!store.progress().contains_key("q1"));
        assert_eq!(store.last_modified(MapField::Progress).get("q1"), Some(&200));
    }

    #[test]
    fn test_stamps_never_go_backwards() {
        let (store, clock, _) = store_at(500);
        store.set_note("q1", "first");
        clock.set(300);
        store.set_note("q1", "second");

        assert_eq!(store.notes().get("q1").map(String::as_str), Some("second"));
        assert_eq!(store.last_modified(MapField::Notes).get("q1"), Some(&500));
    }

    #[test]
    fn test_add_time_accumulates() {
        let (store, _, _) = store_at(1);
        store.add_time("q1", 30);
        store.add_time("q1", 45);
        store.add_time("q2", 0);

        assert_eq!(store.times().get("q1"), Some(&75));
        assert!(!store.times().contains_key("q2"));
        assert!(!store.last_modified(MapField::Times).contains_key("q2"));
    }

    #[test]
    fn test_toggle_star() {
        let (store, _, _) = store_at(1);
        assert!(store.toggle_star("q1"));
        assert_eq!(store.stars().get("q1"), Some(&true));
        assert!(!store.toggle_star("q1"));
        assert!(store.stars().is_empty());
    }

    #[test]
    fn test_mutations_notify_subscribers() {
        let (store, _, _) = store_at(1);
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_status("q1", Status::Mastered);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.set_preference("filter", serde_json::json!("failed"));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_state_survives_rehydrate() {
        let (store, _, backend) = store_at(42);
        store.set_status("q1", Status::Confused);
        store.set_note("q1", "tricky");
        store.toggle_star("q2");

        let rehydrated = LocalStore::hydrate(backend, Arc::new(ManualClock::new(0)));
        assert_eq!(rehydrated.status("q1"), Status::Confused);
        assert_eq!(rehydrated.notes().get("q1").map(String::as_str), Some("tricky"));
        assert_eq!(rehydrated.stars().get("q2"), Some(&true));
        assert_eq!(
            rehydrated.last_modified(MapField::Notes).get("q1"),
            Some(&42)
        );
    }

    #[test]
    fn test_corrupt_state_falls_back_to_empty() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set(STATE_KEY, "{not json").unwrap();

        let store = LocalStore::hydrate(backend, Arc::new(ManualClock::new(0)));
        assert!(store.progress().is_empty());
        assert!(store.notes().is_empty());
    }

    #[test]
    fn test_hydrate_backfills_missing_stamps() {
        let backend = Arc::new(MemoryStorage::new());
        backend
            .set(STATE_KEY, r#"{"progress":{"q1":"mastered"},"notes":{"q2":"n"}}"#)
            .unwrap();

        let store = LocalStore::hydrate(backend, Arc::new(ManualClock::new(0)));
        assert_eq!(store.last_modified(MapField::Progress).get("q1"), Some(&0));
        assert_eq!(store.last_modified(MapField::Notes).get("q2"), Some(&0));
    }

    #[test]
    fn test_builtin_source_cannot_be_removed() {
        let (store, _, _) = store_at(1);
        store.add_repo_source(RepoSource {
            id: "builtin".to_string(),
            url: "https://example.org/data".to_string(),
            name: "Built-in".to_string(),
            enabled: true,
            is_builtin: true,
        });
        store.add_repo_source(RepoSource {
            id: "extra".to_string(),
            url: "https://example.org/extra".to_string(),
            name: "Extra".to_string(),
            enabled: true,
            is_builtin: false,
        });

        assert!(!store.remove_repo_source("builtin"));
        assert!(store.remove_repo_source("extra"));
        assert_eq!(store.repo_sources().len(), 1);
        assert!(store.snapshot().removed_source_ids.contains("extra"));
    }

    #[test]
    fn test_stars_dirty_tracking() {
        let (store, _, _) = store_at(1);
        assert!(!store.snapshot().stars_dirty);

        store.toggle_star("q1");
        assert!(store.snapshot().stars_dirty);

        let snapshot = store.snapshot();
        store.absorb(&snapshot.blob, &snapshot.blob.stars, 3);
        assert!(!store.snapshot().stars_dirty);
        assert_eq!(store.sync_meta().last_synced_version, Some(3));

        store.toggle_star("q1");
        assert!(store.snapshot().stars_dirty);
    }

    #[test]
    fn test_absorb_keeps_newer_local_edits() {
        let (store, clock, _) = store_at(100);
        store.set_status("q1", Status::Failed);
        let snapshot = store.snapshot();

        // Edit lands while the sync is in flight
        clock.set(300);
        store.set_status("q1", Status::Mastered);

        let mut merged = snapshot.blob.clone();
        merged.progress.insert("q2".to_string(), Status::Confused);
        merged.progress_last_modified.insert("q2".to_string(), 200);
        store.absorb(&merged, &snapshot.blob.stars, 1);

        assert_eq!(store.status("q1"), Status::Mastered);
        assert_eq!(store.status("q2"), Status::Confused);
    }

    #[test]
    fn test_absorb_applies_stamped_removal() {
        let (store, _, _) = store_at(100);
        store.set_note("q1", "old");

        let mut merged = store.snapshot().blob;
        merged.notes.remove("q1");
        merged.notes_last_modified.insert("q1".to_string(), 150);
        store.absorb(&merged, &StarMap::new(), 1);

        assert!(!store.notes().contains_key("q1"));
        assert_eq!(store.last_modified(MapField::Notes).get("q1"), Some(&150));
    }

    #[test]
    fn test_absorb_does_not_notify() {
        let (store, _, _) = store_at(1);
        let mut rx = store.subscribe();
        let blob = store.snapshot().blob;
        store.absorb(&blob, &StarMap::new(), 1);
        store.adopt(&blob);
        assert!(!rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();
    }
}
