use std::path::PathBuf;

use pinboard_core::{AuthToken, TokenError};
use thiserror::Error;
use tracing::{debug, warn};

use super::keyring_store::KeyringStore;
use super::shared_store::SharedFileStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),
    #[error("token not found")]
    TokenNotFound,
}

/// One physical location a token can live in.
pub trait SecretStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn store(&self, token: &str) -> Result<(), StorageError>;
    fn remove(&self) -> Result<(), StorageError>;
}

/// Mirrors the API token into an app-local store and a shared container.
///
/// The primary write must succeed; the shared write is best effort. When the
/// shared `needs_refresh` flag is up, the shared copy is the newest value.
pub struct TokenStorage {
    primary: Box<dyn SecretStore>,
    shared: SharedFileStore,
}

impl TokenStorage {
    pub fn new(shared_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Ok(Self::with_backends(
            Box::new(KeyringStore::new()?),
            SharedFileStore::new(shared_dir),
        ))
    }

    pub fn with_backends(primary: Box<dyn SecretStore>, shared: SharedFileStore) -> Self {
        Self { primary, shared }
    }

    pub fn save_token(&self, token: &str) -> Result<(), StorageError> {
        let token = AuthToken::parse(token)?;
        self.primary.store(token.as_str())?;
        if let Err(err) = self
            .shared
            .store(token.as_str())
            .and_then(|()| self.shared.set_needs_refresh(false))
        {
            warn!(error = %err, dir = %self.shared.dir().display(), "shared token mirror not updated");
        }
        Ok(())
    }

    /// Entry point for processes that can only reach the shared container.
    pub fn save_token_from_secondary(&self, token: &str) -> Result<(), StorageError> {
        let token = AuthToken::parse(token)?;
        self.shared.store(token.as_str())?;
        self.shared.set_needs_refresh(true)
    }

    pub fn get_token(&self) -> Result<AuthToken, StorageError> {
        if self.shared.needs_refresh()
            && let Some(token) = self.shared.load()?
        {
            let token = AuthToken::parse(&token)?;
            match self.primary.store(token.as_str()) {
                Ok(()) => {
                    self.shared.set_needs_refresh(false)?;
                    debug!("adopted token written by secondary process");
                }
                Err(err) => warn!(error = %err, "could not copy shared token to primary store"),
            }
            return Ok(token);
        }

        if let Some(token) = self.primary.load()? {
            return Ok(AuthToken::parse(&token)?);
        }

        match self.shared.load() {
            Ok(Some(token)) => {
                let token = AuthToken::parse(&token)?;
                if let Err(err) = self.primary.store(token.as_str()) {
                    warn!(error = %err, "could not restore primary token from shared copy");
                }
                Ok(token)
            }
            Ok(None) => Err(StorageError::TokenNotFound),
            Err(err) => {
                warn!(error = %err, "shared token mirror unreadable");
                Err(StorageError::TokenNotFound)
            }
        }
    }

    pub fn delete_token(&self) -> Result<(), StorageError> {
        self.primary.remove()?;
        self.shared.remove()
    }

    pub fn has_token(&self) -> bool {
        self.get_token().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemoryStore {
        value: Arc<Mutex<Option<String>>>,
        fail_writes: bool,
    }

    impl SecretStore for MemoryStore {
        fn load(&self) -> Result<Option<String>, StorageError> {
            Ok(self.value.lock().unwrap().clone())
        }

        fn store(&self, token: &str) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::Io(std::io::Error::other("read-only")));
            }
            *self.value.lock().unwrap() = Some(token.to_string());
            Ok(())
        }

        fn remove(&self) -> Result<(), StorageError> {
            *self.value.lock().unwrap() = None;
            Ok(())
        }
    }

    fn storage(primary: &MemoryStore, dir: &std::path::Path) -> TokenStorage {
        TokenStorage::with_backends(Box::new(primary.clone()), SharedFileStore::new(dir))
    }

    #[test]
    fn save_writes_both_locations() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryStore::default();
        let storage = storage(&primary, dir.path());

        storage.save_token("alice:ONE").unwrap();

        assert_eq!(primary.load().unwrap().as_deref(), Some("alice:ONE"));
        let shared = SharedFileStore::new(dir.path());
        assert_eq!(shared.load().unwrap().as_deref(), Some("alice:ONE"));
        assert!(!shared.needs_refresh());
        assert_eq!(storage.get_token().unwrap().as_str(), "alice:ONE");
    }

    #[test]
    fn save_rejects_malformed_token() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryStore::default();
        let storage = storage(&primary, dir.path());

        assert!(matches!(
            storage.save_token("no-secret"),
            Err(StorageError::InvalidToken(TokenError::Malformed))
        ));
        assert_eq!(primary.load().unwrap(), None);
    }

    #[test]
    fn secondary_write_wins_and_is_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryStore::default();
        let storage = storage(&primary, dir.path());
        storage.save_token("alice:OLD").unwrap();

        storage.save_token_from_secondary("alice:NEW").unwrap();
        assert_eq!(primary.load().unwrap().as_deref(), Some("alice:OLD"));

        assert_eq!(storage.get_token().unwrap().as_str(), "alice:NEW");
        assert_eq!(primary.load().unwrap().as_deref(), Some("alice:NEW"));
        assert!(!SharedFileStore::new(dir.path()).needs_refresh());
    }

    #[test]
    fn flag_stays_up_when_primary_cannot_adopt() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let storage = storage(&primary, dir.path());

        storage.save_token_from_secondary("alice:NEW").unwrap();

        assert_eq!(storage.get_token().unwrap().as_str(), "alice:NEW");
        assert!(SharedFileStore::new(dir.path()).needs_refresh());
    }

    #[test]
    fn shared_copy_restores_missing_primary() {
        let dir = tempfile::tempdir().unwrap();
        SharedFileStore::new(dir.path()).store("alice:SHARED").unwrap();
        let primary = MemoryStore::default();
        let storage = storage(&primary, dir.path());

        assert_eq!(storage.get_token().unwrap().as_str(), "alice:SHARED");
        assert_eq!(primary.load().unwrap().as_deref(), Some("alice:SHARED"));
    }

    #[test]
    fn delete_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryStore::default();
        let storage = storage(&primary, dir.path());
        storage.save_token("alice:ONE").unwrap();

        storage.delete_token().unwrap();

        assert!(!storage.has_token());
        assert!(matches!(
            storage.get_token(),
            Err(StorageError::TokenNotFound)
        ));
    }
}
