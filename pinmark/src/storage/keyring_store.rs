use keyring::Entry;

use super::token_storage::{SecretStore, StorageError};

const SERVICE_NAME: &str = "in.pinboard.pinmark";
const TOKEN_KEY: &str = "api_token";

/// App-local token slot in the OS keyring.
pub struct KeyringStore {
    entry: Entry,
}

impl KeyringStore {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            entry: Entry::new(SERVICE_NAME, TOKEN_KEY)?,
        })
    }
}

impl SecretStore for KeyringStore {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match self.entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(StorageError::Keyring(err)),
        }
    }

    fn store(&self, token: &str) -> Result<(), StorageError> {
        self.entry.set_password(token)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(StorageError::Keyring(err)),
        }
    }
}
