use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::config::TokenStoreKind;
use crate::error::StoreError;

use super::{FileTokenStore, KeyringTokenStore, TokenPair};

/// Store key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable key/value storage that survives process restarts.
///
/// Implementations only need `get`, `set` and `remove`. The pair helpers
/// fall back to two single-key operations; stores that can write both
/// keys in one step should override them.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Read both tokens. `Ok(None)` when neither is stored,
    /// `StoreError::IncompletePair` when only one is.
    fn load_pair(&self) -> Result<Option<TokenPair>, StoreError> {
        let access = self.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.get(REFRESH_TOKEN_KEY)?;
        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok(Some(TokenPair { access, refresh })),
            (None, None) => Ok(None),
            _ => Err(StoreError::IncompletePair),
        }
    }

    /// When the refresh write fails after the access write went through,
    /// both keys are removed so the store never pairs tokens from two
    /// different sessions.
    fn save_pair(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        self.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        if let Err(e) = self.set(REFRESH_TOKEN_KEY, &tokens.refresh) {
            if let Err(cleanup) = self.clear_pair() {
                warn!(error = %cleanup, "Failed to roll back partial token write");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Both removals are attempted even if the first fails; the first
    /// error is returned.
    fn clear_pair(&self) -> Result<(), StoreError> {
        let access = self.remove(ACCESS_TOKEN_KEY);
        let refresh = self.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

/// Open the store selected in the configuration.
pub fn open_token_store(
    kind: TokenStoreKind,
    cache_dir: &Path,
    passphrase: Option<&str>,
) -> Result<Arc<dyn TokenStore>, StoreError> {
    debug!(?kind, encrypted = passphrase.is_some(), "Opening token store");
    let store: Arc<dyn TokenStore> = match kind {
        TokenStoreKind::File => {
            let store = FileTokenStore::new(cache_dir.to_path_buf())?;
            match passphrase {
                Some(passphrase) => Arc::new(store.with_passphrase(passphrase)),
                None => Arc::new(store),
            }
        }
        TokenStoreKind::Keyring => Arc::new(KeyringTokenStore::new()),
    };
    Ok(store)
}

/// In-process store. Nothing survives a restart; used for tests and for
/// embedding where the host owns persistence.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything stored, ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn save_pair(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        let mut entries = self.lock();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), tokens.access.clone());
        entries.insert(REFRESH_TOKEN_KEY.to_string(), tokens.refresh.clone());
        Ok(())
    }

    fn clear_pair(&self) -> Result<(), StoreError> {
        let mut entries = self.lock();
        entries.remove(ACCESS_TOKEN_KEY);
        entries.remove(REFRESH_TOKEN_KEY);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Store relying on the provided pair helpers.
    #[derive(Default)]
    struct KeyOnlyStore(MemoryTokenStore);

    impl TokenStore for KeyOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.0.remove(key)
        }
    }

    /// Store whose refresh-token writes fail, like a keychain that locks
    /// between two entries.
    #[derive(Default)]
    struct RefreshWriteFails(MemoryTokenStore);

    impl TokenStore for RefreshWriteFails {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if key == REFRESH_TOKEN_KEY {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "keychain locked",
                )));
            }
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.0.remove(key)
        }
    }

    #[test]
    fn test_load_pair_empty() {
        let store = MemoryTokenStore::new();
        assert!(store.load_pair().unwrap().is_none());
    }

    #[test]
    fn test_default_pair_helpers() {
        let store = KeyOnlyStore::default();
        store.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();
        assert_eq!(store.load_pair().unwrap(), Some(TokenPair::new("AT1", "RT1")));

        store.clear_pair().unwrap();
        assert!(store.load_pair().unwrap().is_none());
        assert!(store.0.snapshot().is_empty());
    }

    #[test]
    fn test_failed_refresh_write_never_leaves_mixed_pair() {
        let store = RefreshWriteFails::default();
        store.0.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();

        let err = store.save_pair(&TokenPair::new("AT2", "RT2")).unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.load_pair().unwrap(), None);
        assert!(store.0.snapshot().is_empty());
    }

    #[test]
    fn test_load_pair_detects_single_token() {
        let store = MemoryTokenStore::new();
        store.set(REFRESH_TOKEN_KEY, "RT1").unwrap();
        assert!(matches!(store.load_pair(), Err(StoreError::IncompletePair)));
    }

    #[test]
    fn test_clear_pair_on_empty_store_is_ok() {
        let store = KeyOnlyStore::default();
        store.clear_pair().unwrap();
    }

    #[test]
    fn test_snapshot_uses_well_known_keys() {
        let store = MemoryTokenStore::new();
        store.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("access_token").map(String::as_str), Some("AT1"));
        assert_eq!(snapshot.get("refresh_token").map(String::as_str), Some("RT1"));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_open_file_store_from_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_token_store(TokenStoreKind::File, dir.path(), None).unwrap();
        store.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();
        assert_eq!(store.load_pair().unwrap(), Some(TokenPair::new("AT1", "RT1")));
    }
}
