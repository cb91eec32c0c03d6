//! Session storage kept in a JSON file next to the terminal.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use dltpay::storage::{SessionStore, StorageError};

/// A flat string map persisted as JSON after every write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens `path`. A missing or unreadable file starts empty.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries).map_err(|e| StorageError(e.to_string()))?;
        std::fs::write(&self.path, raw)
            .map_err(|e| StorageError(format!("{}: {e}", self.path.display())))
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        next.insert(key.to_owned(), value.to_owned());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some()
            && let Err(err) = self.persist(&entries)
        {
            tracing::warn!(error = %err, "failed to persist session storage");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dltpay::capability::BackendKind;
    use dltpay::storage::{IdentityScope, PersistedIdentity, SafeStore, load_identity, save_identity};

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dltpay-pos-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn test_identity_survives_reopen() {
        let path = scratch("reopen");
        let identity = PersistedIdentity {
            wallet_address: "rVendor".into(),
            login_method: BackendKind::PushPoll,
            identity_provider: None,
        };
        let store = SafeStore::new(Arc::new(FileStore::open(&path)));
        save_identity(&store, IdentityScope::Vendor, &identity);

        let reopened = SafeStore::new(Arc::new(FileStore::open(&path)));
        assert_eq!(load_identity(&reopened, IdentityScope::Vendor), Some(identity));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unwritable_path_is_refused() {
        let store = FileStore::open(scratch("missing-dir").join("nested").join("s.json"));
        assert!(store.set("k", "v").is_err());
        assert!(store.get("k").is_none());
    }
}
