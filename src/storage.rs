mod filesystem;
mod memory;
mod state;
mod traits;

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;
pub use state::{PersistedState, SyncMeta, DRAFTS_MIGRATED_KEY, DRAFT_PREFIX, STATE_KEY};
pub use traits::{KeyValueStore, StorageBackend};
