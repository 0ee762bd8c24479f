//! Token store backed by a JSON file in the cache directory.
//!
//! The whole key/value map is rewritten on every mutation through a
//! temporary file and a rename, so a token pair lands on disk in one step.
//! With a passphrase the file is sealed with ChaCha20-Poly1305 under a key
//! derived by Argon2; salt and nonce are fresh on every write.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

use super::store::{TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use super::TokenPair;

/// Token file name in cache directory
const TOKEN_FILE: &str = "tokens.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    entries: BTreeMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// On-disk form of an encrypted token file.
#[derive(Debug, Serialize, Deserialize)]
struct SealedFile {
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

pub struct FileTokenStore {
    cache_dir: PathBuf,
    passphrase: Option<String>,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            passphrase: None,
            lock: Mutex::new(()),
        })
    }

    /// Encrypt the file at rest with a key derived from `passphrase`
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(passphrase.to_string());
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.passphrase.is_some()
    }

    /// When the store was last written, if it holds anything
    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let _guard = self.guard();
        Ok(self.read()?.updated_at)
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Result<TokenFile, StoreError> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(TokenFile::default());
        }

        let contents = std::fs::read(&path)?;
        match self.passphrase.as_deref() {
            None => Ok(serde_json::from_slice(&contents)?),
            Some(passphrase) => {
                let sealed: SealedFile = serde_json::from_slice(&contents)?;
                let plain = cipher::open(passphrase, &sealed)?;
                Ok(serde_json::from_slice(&plain)?)
            }
        }
    }

    fn write(&self, file: &TokenFile) -> Result<(), StoreError> {
        let plain = serde_json::to_vec_pretty(file)?;
        let contents = match self.passphrase.as_deref() {
            None => plain,
            Some(passphrase) => serde_json::to_vec(&cipher::seal(passphrase, &plain)?)?,
        };

        let path = self.token_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Like `read`, but a file that cannot be parsed or decrypted counts as
    /// empty. Only for writes that replace the whole pair.
    fn read_or_discard(&self) -> Result<TokenFile, StoreError> {
        match self.read() {
            Err(e @ (StoreError::Corrupt(_) | StoreError::Crypto(_))) => {
                warn!(error = %e, "Discarding unreadable token file");
                Ok(TokenFile::default())
            }
            other => other,
        }
    }

    /// Apply `change` to the stored map under the process lock.
    /// An emptied map removes the file.
    fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        self.update_from(Self::read, change)
    }

    fn update_from<L, F>(&self, load: L, change: F) -> Result<(), StoreError>
    where
        L: FnOnce(&Self) -> Result<TokenFile, StoreError>,
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.guard();
        let mut file = load(self)?;
        change(&mut file.entries);

        if file.entries.is_empty() {
            let path = self.token_path();
            if path.exists() {
                std::fs::remove_file(path)?;
                debug!("Token file removed");
            }
            return Ok(());
        }

        file.updated_at = Some(Utc::now());
        self.write(&file)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.guard();
        Ok(self.read()?.entries.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn load_pair(&self) -> Result<Option<TokenPair>, StoreError> {
        let _guard = self.guard();
        let mut entries = self.read()?.entries;
        match (entries.remove(ACCESS_TOKEN_KEY), entries.remove(REFRESH_TOKEN_KEY)) {
            (Some(access), Some(refresh)) => Ok(Some(TokenPair { access, refresh })),
            (None, None) => Ok(None),
            _ => Err(StoreError::IncompletePair),
        }
    }

    fn save_pair(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        self.update_from(Self::read_or_discard, |entries| {
            entries.insert(ACCESS_TOKEN_KEY.to_string(), tokens.access.clone());
            entries.insert(REFRESH_TOKEN_KEY.to_string(), tokens.refresh.clone());
        })
    }

    fn clear_pair(&self) -> Result<(), StoreError> {
        self.update_from(Self::read_or_discard, |entries| {
            entries.remove(ACCESS_TOKEN_KEY);
            entries.remove(REFRESH_TOKEN_KEY);
        })
    }
}

mod cipher {
    use argon2::Argon2;
    use chacha20poly1305::aead::{Aead, KeyInit};
    use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
    use rand::RngCore;

    use super::SealedFile;
    use crate::error::StoreError;

    const SALT_LEN: usize = 16;
    const NONCE_LEN: usize = 12;
    const KEY_LEN: usize = 32;

    fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Key, StoreError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StoreError::Crypto(format!("key derivation failed: {}", e)))?;
        Ok(Key::clone_from_slice(&key))
    }

    pub(super) fn seal(passphrase: &str, plaintext: &[u8]) -> Result<SealedFile, StoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(&derive_key(passphrase, &salt)?);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StoreError::Crypto("encryption failed".to_string()))?;

        Ok(SealedFile {
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    pub(super) fn open(passphrase: &str, sealed: &SealedFile) -> Result<Vec<u8>, StoreError> {
        if sealed.nonce.len() != NONCE_LEN {
            return Err(StoreError::Crypto("malformed nonce".to_string()));
        }

        let cipher = ChaCha20Poly1305::new(&derive_key(passphrase, &sealed.salt)?);
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| {
                StoreError::Crypto("decryption failed - wrong passphrase or tampered file".to_string())
            })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        store.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();
        drop(store);

        let reopened = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.load_pair().unwrap(), Some(TokenPair::new("AT1", "RT1")));
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("AT1"));
        assert!(reopened.updated_at().unwrap().is_some());
    }

    #[test]
    fn test_clear_pair_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        store.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();
        assert!(dir.path().join(TOKEN_FILE).exists());

        store.clear_pair().unwrap();
        assert!(!dir.path().join(TOKEN_FILE).exists());
        assert!(store.load_pair().unwrap().is_none());
        assert!(store.updated_at().unwrap().is_none());
    }

    #[test]
    fn test_single_key_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        store.set(ACCESS_TOKEN_KEY, "AT1").unwrap();
        assert!(matches!(store.load_pair(), Err(StoreError::IncompletePair)));

        store.set(REFRESH_TOKEN_KEY, "RT1").unwrap();
        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("RT1"));

        // removing an absent key is fine
        store.remove(ACCESS_TOKEN_KEY).unwrap();
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKEN_FILE), "not json").unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(store.load_pair(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_clear_pair_removes_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKEN_FILE), r#"{"entries": {"access_tok"#).unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();

        store.clear_pair().unwrap();

        assert!(!dir.path().join(TOKEN_FILE).exists());
        assert!(store.load_pair().unwrap().is_none());
    }

    #[test]
    fn test_save_pair_overwrites_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKEN_FILE), "not json").unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();

        store.save_pair(&TokenPair::new("AT1", "RT1")).unwrap();

        assert_eq!(store.load_pair().unwrap(), Some(TokenPair::new("AT1", "RT1")));
    }

    #[test]
    fn test_single_key_write_keeps_garbage_file_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKEN_FILE), "not json").unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf()).unwrap();

        assert!(matches!(store.set(ACCESS_TOKEN_KEY, "AT1"), Err(StoreError::Corrupt(_))));
        assert_eq!(std::fs::read_to_string(dir.path().join(TOKEN_FILE)).unwrap(), "not json");
    }

    #[test]
    fn test_encrypted_store_hides_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("correct horse");
        assert!(store.is_encrypted());
        store.save_pair(&TokenPair::new("AT-secret", "RT-secret")).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(TOKEN_FILE)).unwrap();
        assert!(!raw.contains("AT-secret"));
        assert!(!raw.contains("RT-secret"));

        assert_eq!(
            store.load_pair().unwrap(),
            Some(TokenPair::new("AT-secret", "RT-secret"))
        );
    }

    #[test]
    fn test_wrong_passphrase_is_crypto_error() {
        let dir = tempfile::tempdir().unwrap();
        FileTokenStore::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("correct horse")
            .save_pair(&TokenPair::new("AT1", "RT1"))
            .unwrap();

        let wrong = FileTokenStore::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("battery staple");
        assert!(matches!(wrong.load_pair(), Err(StoreError::Crypto(_))));
    }
}
