//! Local persistence adapter — namespaced key/value string storage
//!
//! Values are JSON-encoded strings. Two backends:
//! - [`FileLocalStore`] — one `<key>.json` file per key inside a directory
//! - [`MemoryLocalStore`] — process-local map, used by tests and ephemeral callers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SavError};

pub const VIEWED_EXPERTS_KEY: &str = "sav-viewed-experts";
pub const DEV_MODE_KEY: &str = "sav-dev-mode";
const TEMPLATE_KEY_PREFIX: &str = "sav-notification-template-";

pub fn template_key(template_type: &str) -> String {
    format!("{}{}", TEMPLATE_KEY_PREFIX, template_type)
}

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON value. Absent key ⇒ `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize + ?Sized>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

// ============================================================================
// FileLocalStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(SavError::Other(format!("invalid local key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        // Write to a temp file, then rename over the key.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// MemoryLocalStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (quota exceeded, storage disabled...).
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    fn check(&self) -> Result<()> {
        if *lock(&self.failing) {
            return Err(SavError::Other("local storage unavailable".to_string()));
        }
        Ok(())
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Poisoning only happens if a holder panicked; the map itself stays valid.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_key_is_namespaced() {
        assert_eq!(template_key("new_client"), "sav-notification-template-new_client");
    }

    #[test]
    fn test_file_store_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path().join("nested")).unwrap();

        assert_eq!(store.get(VIEWED_EXPERTS_KEY).unwrap(), None);
        store.set(VIEWED_EXPERTS_KEY, "{\"a\":1}").unwrap();
        assert_eq!(store.get(VIEWED_EXPERTS_KEY).unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(dir.path().join("nested/sav-viewed-experts.json").exists());

        store.remove(VIEWED_EXPERTS_KEY).unwrap();
        assert_eq!(store.get(VIEWED_EXPERTS_KEY).unwrap(), None);
        // second remove is fine
        store.remove(VIEWED_EXPERTS_KEY).unwrap();
    }

    #[test]
    fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("a/b").is_err());
    }

    #[test]
    fn test_json_helpers_round_trip() {
        let store = MemoryLocalStore::new();
        save_json(&store, "sav-test", &vec![1, 2, 3]).unwrap();
        let back: Option<Vec<i32>> = load_json(&store, "sav-test").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        store.set("sav-broken", "{not json").unwrap();
        assert!(load_json::<Vec<i32>>(&store, "sav-broken").is_err());
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = MemoryLocalStore::new();
        store.set_failing(true);
        assert!(store.set("k", "v").is_err());
        store.set_failing(false);
        store.set("k", "v").unwrap();
        assert!(store.contains("k"));
    }
}
