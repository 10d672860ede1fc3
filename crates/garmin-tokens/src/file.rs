//! File-backed token and credential persistence
//!
//! One JSON file per stored item inside a data directory. All writes use
//! atomic temp-file + rename to prevent corruption on crash, and files are
//! created with 0600 permissions since they contain live tokens.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use garmin_auth::{OAuth1Credential, OAuth2Token};

use crate::error::{Error, Result};
use crate::storage::{CredentialStore, SavedCredentials, TokenStorage};

/// File name of the stored OAuth1 credential.
pub const OAUTH1_FILE: &str = "oauth1_token.json";

/// File name of the stored OAuth2 token.
pub const OAUTH2_FILE: &str = "oauth2_token.json";

/// File name of the saved login credentials.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Token storage backed by JSON files in a data directory.
///
/// The mutex serializes writes; concurrent savers otherwise race on the
/// shared temp-file path.
pub struct FileTokenStorage {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn oauth1_path(&self) -> PathBuf {
        self.dir.join(OAUTH1_FILE)
    }

    fn oauth2_path(&self) -> PathBuf {
        self.dir.join(OAUTH2_FILE)
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn save_oauth1(&self, credential: &OAuth1Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.oauth1_path(), credential).await
    }

    async fn get_oauth1(&self) -> Result<Option<OAuth1Credential>> {
        read_json(&self.oauth1_path()).await
    }

    async fn delete_oauth1(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_present(&self.oauth1_path()).await
    }

    async fn save_oauth2(&self, token: &OAuth2Token) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.oauth2_path(), token).await
    }

    async fn get_oauth2(&self) -> Result<Option<OAuth2Token>> {
        read_json(&self.oauth2_path()).await
    }

    async fn delete_oauth2(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_present(&self.oauth2_path()).await
    }

    async fn save_both(&self, credential: &OAuth1Credential, token: &OAuth2Token) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.oauth1_path(), credential).await?;
        write_atomic(&self.oauth2_path(), token).await
    }

    async fn delete_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_present(&self.oauth1_path()).await?;
        remove_if_present(&self.oauth2_path()).await
    }
}

/// Saved-credential store backed by a single JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store rooted in a data directory, using the conventional file name.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CREDENTIALS_FILE))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, credentials: &SavedCredentials) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, credentials).await
    }

    async fn get(&self) -> Result<Option<SavedCredentials>> {
        read_json(&self.path).await
    }

    async fn delete(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_present(&self.path).await
    }
}

/// Read and parse a JSON file; a missing file is `None`, not an error.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let value = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Storage(format!("reading {}: {e}", path.display()))),
    }
}

/// Write a value as JSON atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target, so a crash mid-write never leaves a partial file. The file
/// is created 0600 (owner read/write only).
async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Storage(format!("serializing {}: {e}", path.display())))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("{} has no parent directory", path.display())))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Storage(format!("{} has no file name", path.display())))?
        .to_string_lossy();
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing {}: {e}", tmp_path.display())))?;

    // 0600: the file holds live tokens (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting permissions on {}: {e}", tmp_path.display())))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming into {}: {e}", path.display())))?;

    debug!(path = %path.display(), "persisted");
    Ok(())
}

/// Remove a file, treating "already gone" as success.
async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Storage(format!("deleting {}: {e}", path.display()))),
    }
}
