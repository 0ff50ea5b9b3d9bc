//! Credential persistence
//!
//! A `CredentialRecord` holds the access token, refresh token, and absolute
//! expiry of the single signed-in user. `CredentialStore` is the passive
//! persistence surface behind the token manager: it has no lifecycle logic of
//! its own, and `load` never fails (absent or malformed data reads as empty).
//!
//! Two stores are provided: a JSON file for the CLI (atomic temp-file +
//! rename, 0600 permissions) and an in-memory store for server contexts and tests.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// The persisted token set.
///
/// `expires_at` is a unix timestamp in milliseconds, computed once from
/// `expires_in` when the record is created and never recomputed. A record
/// without it is never valid. Serialized as `{accessToken, refreshToken, tokenExpiry}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(rename = "tokenExpiry", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl CredentialRecord {
    /// Build a record from a token endpoint response issued at `issued_at` (ms).
    ///
    /// When the response omits a refresh token, `previous_refresh` is carried forward.
    pub fn from_token_response(
        response: &TokenResponse,
        issued_at: u64,
        previous_refresh: Option<String>,
    ) -> Self {
        let refresh_token = response
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .or(previous_refresh);
        Self {
            access_token: response.access_token.clone(),
            refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| issued_at.saturating_add(secs.saturating_mul(1000))),
        }
    }

    /// True iff the access token is non-empty and `now` is before expiry.
    pub fn is_valid_at(&self, now: u64) -> bool {
        !self.access_token.is_empty() && self.expires_at.is_some_and(|expires| now < expires)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Persistence medium for the credential record.
///
/// Uses `Pin<Box<dyn Future>>` return types so the manager can hold an
/// `Arc<dyn CredentialStore>` without knowing which medium backs it.
pub trait CredentialStore: Send + Sync {
    /// Read the record. Absent or unreadable data yields `None`, never an error.
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<CredentialRecord>> + Send + '_>>;

    /// Overwrite the record wholesale. Last write wins.
    fn save<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Remove the record. Clearing an empty store succeeds.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-memory store. Used on the server side, where nothing may outlive the
/// process, and as a fake in tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing record.
    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<CredentialRecord>> + Send + '_>> {
        Box::pin(async move { self.record.lock().await.clone() })
    }

    fn save<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            *self.record.lock().await = Some(record.clone());
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.record.lock().await.take();
            Ok(())
        })
    }
}

/// JSON file store for the CLI.
///
/// The Mutex serializes writers within the process so two saves never share
/// the same temp file. Cross-process coordination is not attempted.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<CredentialRecord>> + Send + '_>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "no stored credentials");
                    return None;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "failed to read credential file");
                    return None;
                }
            };
            match serde_json::from_str::<CredentialRecord>(&contents) {
                Ok(record) => {
                    info!(
                        path = %self.path.display(),
                        has_refresh_token = record.has_refresh_token(),
                        "loaded credentials"
                    );
                    Some(record)
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "ignoring malformed credential file");
                    None
                }
            }
        })
    }

    fn save<'a>(
        &'a self,
        record: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            write_atomic(&self.path, record).await
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
            }
        })
    }
}

/// Write the record to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 since the file contains tokens.
async fn write_atomic(path: &Path, record: &CredentialRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
