//! Bearer credential storage.
//!
//! The realtime transport and the API client read the bearer token at call
//! time through the [`CredentialStore`] trait. Absence of a token means
//! "logged out" and is never an error.
//!
//! # Storage
//!
//! - Production: one OS keyring entry `reportcast/credentials` containing JSON.
//! - Test mode (`REPORTCAST_ENV=test`): `{config_dir}/credentials.json`.
//! - Tests: [`MemoryCredentialStore`].

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Keyring service name.
const KEYRING_SERVICE: &str = "reportcast";
/// Consolidated keyring entry name.
const KEYRING_CREDENTIALS: &str = "credentials";

/// Categorized credential access errors.
#[derive(Debug)]
pub enum CredentialError {
    /// Keyring is locked and requires user interaction to unlock.
    Locked(String),
    /// Access denied by the platform store.
    AccessDenied(String),
    /// Data exists but is unparseable.
    Corrupted(String),
    /// Filesystem error in file-backed mode.
    Io(std::io::Error),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked(msg) => write!(f, "Keyring locked: {msg}"),
            Self::AccessDenied(msg) => write!(f, "Keyring access denied: {msg}"),
            Self::Corrupted(msg) => write!(f, "Credential data corrupted: {msg}"),
            Self::Io(e) => write!(f, "Credential file error: {e}"),
            Self::Other(msg) => write!(f, "Keyring error: {msg}"),
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CredentialError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Durable key-value store holding the bearer token.
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Current bearer token, `None` when logged out.
    fn token(&self) -> Result<Option<String>, CredentialError>;

    /// Store a new bearer token.
    fn set_token(&self, token: &str) -> Result<(), CredentialError>;

    /// Remove the bearer token.
    fn clear(&self) -> Result<(), CredentialError>;
}

/// JSON document persisted by the keyring and file stores.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_token: Option<String>,
    #[serde(default = "default_version")]
    version: u8,
}

fn default_version() -> u8 {
    1
}

impl StoredCredentials {
    fn with_token(token: &str) -> Self {
        Self {
            api_token: Some(token.to_string()),
            version: default_version(),
        }
    }

    fn parse(json: &str) -> Result<Self, CredentialError> {
        serde_json::from_str(json).map_err(|e| CredentialError::Corrupted(e.to_string()))
    }

    fn to_json(&self) -> Result<String, CredentialError> {
        serde_json::to_string(self).map_err(|e| CredentialError::Other(e.to_string()))
    }

    /// Empty tokens count as logged out.
    fn into_token(self) -> Option<String> {
        self.api_token.filter(|t| !t.is_empty())
    }
}

/// Categorize a keyring error for log output.
fn categorize_keyring_error(err: &keyring::Error) -> CredentialError {
    let msg = format!("{err:?}");
    let msg_lower = msg.to_lowercase();

    if msg_lower.contains("user interaction") || msg_lower.contains("user canceled") {
        return CredentialError::Locked(msg);
    }

    if msg_lower.contains("denied")
        || msg_lower.contains("codesign")
        || msg_lower.contains("not allowed")
    {
        return CredentialError::AccessDenied(msg);
    }

    CredentialError::Other(msg)
}

/// OS keyring backed store.
#[derive(Debug, Default)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry() -> Result<Entry, CredentialError> {
        Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| CredentialError::Other(format!("Failed to create entry: {e:?}")))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn token(&self) -> Result<Option<String>, CredentialError> {
        match Self::entry()?.get_password() {
            Ok(json) => Ok(StoredCredentials::parse(&json)?.into_token()),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(categorize_keyring_error(&e)),
        }
    }

    fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        let json = StoredCredentials::with_token(token).to_json()?;
        Self::entry()?
            .set_password(&json)
            .map_err(|e| categorize_keyring_error(&e))?;
        log::info!("Saved credentials to OS keyring");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                log::info!("Deleted credentials from OS keyring");
                Ok(())
            }
            Err(e) => Err(categorize_keyring_error(&e)),
        }
    }
}

/// Plain-file store used in test environments.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Result<Option<String>, CredentialError> {
        if !self.path.exists() {
            log::debug!("No credentials file at {}", self.path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(StoredCredentials::parse(&content)?.into_token())
    }

    fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        fs::write(&self.path, StoredCredentials::with_token(token).to_json()?)?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        log::debug!("Saved credentials to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    /// Store pre-populated with `token`.
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Result<Option<String>, CredentialError> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Store appropriate for the current environment.
pub fn default_store() -> anyhow::Result<Arc<dyn CredentialStore>> {
    if crate::env::should_skip_keyring() {
        let path = crate::config::Config::config_dir()?.join("credentials.json");
        return Ok(Arc::new(FileCredentialStore::new(path)));
    }
    Ok(Arc::new(KeyringCredentialStore))
}

/// Read the token off the async executor.
///
/// Platform keyrings may block on IPC, so reads from async code go through
/// the blocking pool. Errors are logged and reported as "no credential".
pub async fn read_token(store: &Arc<dyn CredentialStore>) -> Option<String> {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.token()).await {
        Ok(Ok(token)) => token,
        Ok(Err(e)) => {
            log::warn!("Credential store unavailable: {}", e);
            None
        }
        Err(e) => {
            log::warn!("Credential read task failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));

        assert!(store.token().unwrap().is_none());
        store.set_token("tok_123").unwrap();
        assert_eq!(store.token().unwrap().as_deref(), Some("tok_123"));
        store.clear().unwrap();
        assert!(store.token().unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::new(path);
        assert!(matches!(store.token(), Err(CredentialError::Corrupted(_))));
    }

    #[test]
    fn test_empty_token_is_logged_out() {
        let creds = StoredCredentials::parse(r#"{"api_token": ""}"#).unwrap();
        assert!(creds.into_token().is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::default();
        assert!(store.token().unwrap().is_none());
        store.set_token("abc").unwrap();
        assert_eq!(store.token().unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_read_token_from_async() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::with_token("t"));
        assert_eq!(read_token(&store).await.as_deref(), Some("t"));
    }
}
