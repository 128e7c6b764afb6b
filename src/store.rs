//! Persistent key-value storage
//!
//! The schedule cache talks to storage only through [`KeyValueStore`], so the
//! embedding app can hand in its own platform store.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::{MihrabError, Result};

/// String-keyed, string-valued durable storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the whole value stored under `key`
    fn set(&self, key: &str, value: String) -> Result<()>;
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| MihrabError::Cache("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| MihrabError::Cache("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object file.
///
/// Writes go to a sibling temp file that is then renamed over the original, so
/// readers see either the previous contents or the new ones.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file contents; a missing file reads as empty
    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(MihrabError::Cache(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn parse(contents: &str) -> serde_json::Result<BTreeMap<String, String>> {
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(contents)
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        Self::parse(&self.read()?)
            .map_err(|e| MihrabError::Cache(format!("{}: {}", self.path.display(), e)))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| MihrabError::Cache("file store lock poisoned".to_string()))?;

        // Unreadable contents are discarded and overwritten
        let mut entries = match Self::parse(&self.read()?) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Replacing unreadable store file");
                BTreeMap::new()
            }
        };
        entries.insert(key.to_string(), value);
        let contents = serde_json::to_string_pretty(&entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| MihrabError::Cache(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)
            .map_err(|e| MihrabError::Cache(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| MihrabError::Cache(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}
