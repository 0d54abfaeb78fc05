use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use super::token_storage::{SecretStore, StorageError};

const TOKEN_FILENAME: &str = "api_token";
const REFRESH_FLAG_FILENAME: &str = "needs_refresh";

/// Token mirror in a directory shared with secondary processes.
///
/// A secondary writer raises the `needs_refresh` flag after writing so the
/// primary side knows this copy is newer than its own.
pub struct SharedFileStore {
    dir: PathBuf,
}

impl SharedFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn needs_refresh(&self) -> bool {
        self.flag_path().exists()
    }

    pub fn set_needs_refresh(&self, raised: bool) -> Result<(), StorageError> {
        let flag = self.flag_path();
        if raised {
            write_private(&flag, b"1")?;
        } else if flag.exists() {
            fs::remove_file(flag)?;
        }
        Ok(())
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILENAME)
    }

    fn flag_path(&self) -> PathBuf {
        self.dir.join(REFRESH_FLAG_FILENAME)
    }
}

impl SecretStore for SharedFileStore {
    fn load(&self) -> Result<Option<String>, StorageError> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let token = fs::read_to_string(path)?;
        let token = token.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn store(&self, token: &str) -> Result<(), StorageError> {
        write_private(&self.token_path(), token.as_bytes())
    }

    fn remove(&self) -> Result<(), StorageError> {
        let path = self.token_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        self.set_needs_refresh(false)
    }
}

// Written to a sibling temp file and renamed so readers never see a partial token.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_loads_and_removes_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedFileStore::new(dir.path().join("shared"));

        assert_eq!(store.load().unwrap(), None);
        store.store("alice:SECRET").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("alice:SECRET"));

        store.remove().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn refresh_flag_round_trips_and_is_cleared_on_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedFileStore::new(dir.path());

        assert!(!store.needs_refresh());
        store.set_needs_refresh(true).unwrap();
        assert!(store.needs_refresh());
        store.remove().unwrap();
        assert!(!store.needs_refresh());
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = SharedFileStore::new(dir.path());
        store.store("alice:SECRET").unwrap();

        let mode = fs::metadata(store.token_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
