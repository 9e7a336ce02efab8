use anyhow::Result;

/// Trait for durable, local key-value persistence.
///
/// Keys are application-scoped strings; values are serialized documents.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Returns `None` if the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically replace the value stored under `key`.
    /// Implementation should ensure atomicity (temp file + rename or equivalent).
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key.
    /// Returns Ok(()) even if the key didn't exist.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Combined storage backend trait
pub trait StorageBackend: KeyValueStore {
    /// Initialize storage (create directories, verify access, etc.)
    fn initialize(&self) -> Result<()>;
}
