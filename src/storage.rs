//! Durable local storage: a tiny string key-value store.
//!
//! Two keys are used by the relay, the identity handle and the last known feed.
//! Values are opaque strings; JSON helpers sit on top.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RelayError, RelayResult};
use crate::util::Handle;

/// Key holding the identity handle (plain string).
pub const IDENTITY_KEY: &str = "relay_node_id";

/// Key holding the last known feed snapshot (JSON array).
pub const FEED_CACHE_KEY: &str = "relay_messages";

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> RelayResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RelayResult<()>;
    fn remove(&self, key: &str) -> RelayResult<()>;
}

/// Reads and decodes a JSON value. A missing key is `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> RelayResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize + ?Sized>(store: &dyn LocalStore, key: &str, value: &T) -> RelayResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// One file per key inside a directory, named after the key. Values are
/// stored verbatim, JSON or not.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> RelayResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> RelayResult<PathBuf> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RelayError::Validation("storage keys are limited to [A-Za-z0-9_-]"));
        }
        Ok(self.dir.join(key))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> RelayResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> RelayResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> RelayResult<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Volatile store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Handle<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.get().is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> RelayResult<Option<String>> {
        Ok(self.entries.get().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> RelayResult<()> {
        self.entries.get_mut().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> RelayResult<()> {
        self.entries.get_mut().remove(key);
        Ok(())
    }
}
