//! # Key Storage
//!
//! Engine-owned persistence for private keys, the self card and ratchet
//! session state.
//!
//! ## Overview
//!
//! [`KeyStorage`] is a flat, synchronous name → bytes store scoped to one
//! identity. Engines call it from blocking workers, so implementations may do
//! plain file I/O. Two implementations ship with the crate:
//!
//! - [`MemoryKeyStorage`] keeps entries in process memory
//! - [`FileKeyStorage`] writes one file per entry below a directory
//!
//! Entry names may contain any character; the file store hex-encodes them
//! into file names.

use crate::error::{EngineError, Result};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

pub trait KeyStorage: Send + Sync {
    fn store(&self, name: &str, data: &[u8]) -> Result<()>;

    fn load(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Removes `name`. Returns `false` when there was nothing to remove.
    fn delete(&self, name: &str) -> Result<bool>;

    fn names(&self) -> Result<Vec<String>>;

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.load(name)?.is_some())
    }

    /// Removes every entry whose name starts with `prefix`.
    fn delete_prefixed(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for name in self.names()? {
            if name.starts_with(prefix) && self.delete(&name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[derive(Default)]
pub struct MemoryKeyStorage {
    entries: RwLock<BTreeMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for MemoryKeyStorage {
    fn store(&self, name: &str, data: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(name.to_string(), Zeroizing::new(data.to_vec()));
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries.read().get(name).cloned())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.entries.write().remove(name).is_some())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// Directory-backed storage, one file per entry.
#[derive(Debug, Clone)]
pub struct FileKeyStorage {
    root: PathBuf,
}

impl FileKeyStorage {
    /// Opens (and creates if needed) the storage directory.
    ///
    /// # Errors
    ///
    /// Returns a key storage error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            EngineError::key_storage(format!(
                "Failed to create key storage at {}: {}",
                root.display(),
                e
            ))
        })?;
        debug!(path = %root.display(), "Opened file key storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.key", hex::encode(name.as_bytes())))
    }
}

impl KeyStorage for FileKeyStorage {
    fn store(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        let staging = path.with_extension("tmp");
        fs::write(&staging, data)
            .and_then(|_| fs::rename(&staging, &path))
            .map_err(|e| EngineError::key_storage(format!("Failed to write entry '{}': {}", name, e)))
    }

    fn load(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match fs::read(self.path_for(name)) {
            Ok(data) => Ok(Some(Zeroizing::new(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::key_storage(format!(
                "Failed to read entry '{}': {}",
                name, e
            ))),
        }
    }

    fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::file_deletion(format!(
                "Failed to delete entry '{}': {}",
                name, e
            ))),
        }
    }

    fn names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            EngineError::key_storage(format!("Failed to list key storage: {}", e))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| EngineError::key_storage(format!("Failed to list key storage: {}", e)))?;
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".key")) else {
                continue;
            };
            if let Some(name) = hex::decode(stem).ok().and_then(|b| String::from_utf8(b).ok()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
