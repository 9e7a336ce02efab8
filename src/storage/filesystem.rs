use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::traits::{KeyValueStore, StorageBackend};

/// Longest hex file name used for a key; most filesystems cap names at 255
/// bytes.
const MAX_HEX_NAME_LEN: usize = 240;

/// Filesystem-based key-value backend. Each key is one file whose name is
/// the hex encoding of the key, so a key prefix is also a file name prefix.
/// Keys too long for that live under `long/`, named by their SHA-256 digest,
/// with the key stored next to the value.
pub struct FilesystemStorage {
    base_path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct LongEntry {
    key: String,
    value: String,
}

enum EntryPath {
    Hex(PathBuf),
    Long(PathBuf),
}

/// Write `content` to `path` through a temp file in `dir` and an atomic
/// rename.
fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    // 1. Write to temp file in the same directory
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    temp.write_all(content)?;
    temp.flush()?;

    // 2. Atomic rename (atomic on POSIX systems)
    temp.persist(path)
        .with_context(|| format!("Failed to persist entry to {:?}", path))?;
    Ok(())
}

impl FilesystemStorage {
    /// Create a new filesystem storage backend
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        Ok(FilesystemStorage {
            base_path: base_path.as_ref().to_path_buf(),
        })
    }

    /// Get the path to the entries directory
    fn entries_dir(&self) -> PathBuf {
        self.base_path.join("entries")
    }

    fn long_dir(&self) -> PathBuf {
        self.entries_dir().join("long")
    }

    fn entry_path(&self, key: &str) -> EntryPath {
        let name = hex::encode(key.as_bytes());
        if name.len() <= MAX_HEX_NAME_LEN {
            EntryPath::Hex(self.entries_dir().join(name))
        } else {
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            EntryPath::Long(self.long_dir().join(digest))
        }
    }

    fn read_long(path: &Path) -> Result<Option<LongEntry>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read entry from {:?}", path))?;
        let entry = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse long-key entry {:?}", path))?;
        Ok(Some(entry))
    }
}

impl KeyValueStore for FilesystemStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry_path(key) {
            EntryPath::Hex(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read entry {:?} from {:?}", key, path))?;
                Ok(Some(content))
            }
            EntryPath::Long(path) => Ok(Self::read_long(&path)?
                .filter(|entry| entry.key == key)
                .map(|entry| entry.value)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        match self.entry_path(key) {
            EntryPath::Hex(path) => write_atomic(&self.entries_dir(), &path, value.as_bytes()),
            EntryPath::Long(path) => {
                let dir = self.long_dir();
                fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {:?}", dir))?;
                let entry = LongEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                };
                write_atomic(&dir, &path, serde_json::to_string(&entry)?.as_bytes())
            }
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        let (EntryPath::Hex(path) | EntryPath::Long(path)) = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove entry {:?}", key))?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let hex_prefix = hex::encode(prefix.as_bytes());
        let mut keys = Vec::new();

        for entry in fs::read_dir(self.entries_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Leftover temp files and foreign files don't decode; skip them
            if !name.starts_with(&hex_prefix) {
                continue;
            }
            if let Some(key) = hex::decode(name)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                keys.push(key);
            }
        }

        let long_dir = self.long_dir();
        if long_dir.is_dir() {
            for entry in fs::read_dir(&long_dir)? {
                let path = entry?.path();
                // Temp files and foreign files don't parse; skip them
                if let Ok(Some(long)) = Self::read_long(&path) {
                    if long.key.starts_with(prefix) {
                        keys.push(long.key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

impl StorageBackend for FilesystemStorage {
    fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.entries_dir())
            .with_context(|| format!("Failed to create storage directory {:?}", self.base_path))?;
        Ok(())
    }
}
