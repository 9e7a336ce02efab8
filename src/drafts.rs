//! Local-only answer drafts. Never synced.
//!
//! Each draft lives under its own key, `DRAFT_PREFIX` + question id, so the
//! whole set can be enumerated with a prefix scan.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::{KeyValueStore, DRAFTS_MIGRATED_KEY, DRAFT_PREFIX};

pub type DraftMap = BTreeMap<String, String>;

pub struct DraftStore {
    backend: Arc<dyn KeyValueStore>,
}

impl DraftStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn get(&self, id: &str) -> Result<Option<String>> {
        self.backend
            .get(&draft_key(id))
            .with_context(|| format!("Failed to read draft {}", id))
    }

    /// Overwrites any previous draft for `id`.
    pub fn save(&self, id: &str, text: &str) -> Result<()> {
        self.backend
            .set(&draft_key(id), text)
            .with_context(|| format!("Failed to save draft {}", id))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.backend
            .remove(&draft_key(id))
            .with_context(|| format!("Failed to delete draft {}", id))
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        let keys = self
            .backend
            .keys_with_prefix(DRAFT_PREFIX)
            .context("Failed to enumerate drafts")?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(DRAFT_PREFIX).map(str::to_string))
            .collect())
    }

    pub fn export_all(&self) -> Result<DraftMap> {
        let mut drafts = DraftMap::new();
        for id in self.list_ids()? {
            // Deleted between the scan and the read
            if let Some(text) = self.get(&id)? {
                drafts.insert(id, text);
            }
        }
        Ok(drafts)
    }

    /// Save every entry of `drafts`, overwriting drafts with the same id.
    /// Drafts not in the map are left alone.
    pub fn import_all(&self, drafts: &DraftMap) -> Result<usize> {
        for (id, text) in drafts {
            self.save(id, text)?;
        }
        tracing::info!("Imported {} draft(s)", drafts.len());
        Ok(drafts.len())
    }

    /// Delete every draft. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let ids = self.list_ids()?;
        for id in &ids {
            self.delete(id)?;
        }
        Ok(ids.len())
    }

    /// Absorb drafts kept by an older storage mechanism. Runs at most once
    /// per backend, and never replaces a draft that already exists.
    pub fn migrate_from(&self, legacy: &DraftMap) -> Result<usize> {
        if self
            .backend
            .get(DRAFTS_MIGRATED_KEY)
            .context("Failed to read draft migration marker")?
            .is_some()
        {
            tracing::debug!("Legacy drafts already migrated");
            return Ok(0);
        }

        let mut migrated = 0;
        for (id, text) in legacy {
            if text.is_empty() || self.get(id)?.is_some() {
                continue;
            }
            self.save(id, text)?;
            migrated += 1;
        }

        self.backend
            .set(DRAFTS_MIGRATED_KEY, &chrono::Utc::now().to_rfc3339())
            .context("Failed to write draft migration marker")?;
        tracing::info!("Migrated {} legacy draft(s)", migrated);
        Ok(migrated)
    }
}

fn draft_key(id: &str) -> String {
    format!("{}{}", DRAFT_PREFIX, id)
}
