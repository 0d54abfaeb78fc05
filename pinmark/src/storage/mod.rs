mod keyring_store;
mod shared_store;
mod token_storage;

pub use keyring_store::KeyringStore;
pub use shared_store::SharedFileStore;
pub use token_storage::{SecretStore, StorageError, TokenStorage};
