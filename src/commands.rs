use anyhow::{Context as _, Result};
use std::io::Write;
use std::sync::Arc;

use study_sync::config::SyncConfig;
use study_sync::drafts::DraftStore;
use study_sync::remote::{HttpRemote, SyncAdapter};
use study_sync::storage::{FilesystemStorage, StorageBackend};
use study_sync::store::{LocalStore, SystemClock};
use study_sync::sync::{SyncEngine, SyncOutcome};

pub mod catalog;
pub mod drafts;
pub mod sources;
pub mod status;
pub mod sync;
pub mod watch;

/// Everything a command needs, opened once per invocation.
pub struct Context {
    pub config: SyncConfig,
    backend: Arc<FilesystemStorage>,
    pub store: Arc<LocalStore>,
}

impl Context {
    pub fn open(config: SyncConfig) -> Result<Self> {
        let data_dir = config.ensure_data_dir()?;
        let backend = Arc::new(FilesystemStorage::new(&data_dir)?);
        backend.initialize()?;
        tracing::debug!("Using data directory {:?}", data_dir);

        let store = Arc::new(LocalStore::hydrate(backend.clone(), Arc::new(SystemClock)));
        Ok(Self {
            config,
            backend,
            store,
        })
    }

    /// Sync engine over the configured HTTP remote.
    pub fn engine(&self) -> Result<Arc<SyncEngine>> {
        let url = self
            .config
            .remote_url
            .clone()
            .context("No remote configured; set remote_url or STUDY_SYNC_REMOTE_URL")?;
        let remote = HttpRemote::new(
            url,
            self.config.auth_token.clone(),
            self.config.request_timeout(),
        )?;
        let adapter = SyncAdapter::new(Arc::new(remote), self.config.retry_policy());
        Ok(Arc::new(SyncEngine::new(self.store.clone(), adapter)))
    }

    pub fn drafts(&self) -> DraftStore {
        DraftStore::new(self.backend.clone())
    }
}

pub fn print_outcome<W: Write>(output: &mut W, outcome: &SyncOutcome) -> Result<()> {
    match outcome {
        SyncOutcome::Pushed { version } => writeln!(output, "pushed version {}", version)?,
        SyncOutcome::UpToDate { version } => writeln!(output, "up to date at version {}", version)?,
        SyncOutcome::Conflict(report) => {
            writeln!(output, "conflict on {} key(s):", report.keys.len())?;
            for key in &report.keys {
                writeln!(output, "  {}", key)?;
            }
        }
    }
    Ok(())
}
