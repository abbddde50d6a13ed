//! Credential storage
//!
//! `CredentialStore` is the only mutable state shared between concurrent
//! requests. Reads and writes go through a tokio Mutex, so a read observes
//! either the whole pair before a write or the whole pair after it.
//!
//! Two implementations:
//! - `MemoryCredentialStore`: credentials live and die with the process
//! - `FileCredentialStore`: same in-memory state, persisted to a JSON file with
//!   atomic temp-file + rename writes so the session survives restarts

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by `CredentialStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Short-lived bearer credential attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(Secret<String>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

/// Longer-lived secret used only to mint a new access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken(Secret<String>);

impl RefreshToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

/// Where the refresh credential lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Held in the credential store and sent in the renewal body
    Explicit,
    /// HTTP-only cookie replayed by the transport; invisible to this layer
    Cookie,
}

/// Storage for the current credential pair.
///
/// `write` replaces the access token; `refresh` replaces the refresh token
/// only when `Some` (the backend did not rotate it otherwise).
pub trait CredentialStore: Send + Sync {
    fn read(&self) -> StoreFuture<'_, Option<AccessToken>>;

    fn refresh_token(&self) -> StoreFuture<'_, Option<RefreshToken>>;

    fn write(
        &self,
        access: AccessToken,
        refresh: Option<RefreshToken>,
    ) -> StoreFuture<'_, Result<()>>;

    fn clear(&self) -> StoreFuture<'_, Result<()>>;
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    access: Option<AccessToken>,
    refresh: Option<RefreshToken>,
}

impl Credentials {
    fn replace(&mut self, access: AccessToken, refresh: Option<RefreshToken>) {
        self.access = Some(access);
        if refresh.is_some() {
            self.refresh = refresh;
        }
    }
}

/// In-memory store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a credential pair.
    pub fn with_credentials(access: Option<AccessToken>, refresh: Option<RefreshToken>) -> Self {
        Self {
            state: Mutex::new(Credentials { access, refresh }),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read(&self) -> StoreFuture<'_, Option<AccessToken>> {
        Box::pin(async move { self.state.lock().await.access.clone() })
    }

    fn refresh_token(&self) -> StoreFuture<'_, Option<RefreshToken>> {
        Box::pin(async move { self.state.lock().await.refresh.clone() })
    }

    fn write(
        &self,
        access: AccessToken,
        refresh: Option<RefreshToken>,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.replace(access, refresh);
            debug!("credentials replaced");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.lock().await = Credentials::default();
            debug!("credentials cleared");
            Ok(())
        })
    }
}

/// On-disk layout of the credential file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

impl From<&Credentials> for StoredCredentials {
    fn from(c: &Credentials) -> Self {
        Self {
            access: c.access.as_ref().map(|t| t.expose().to_owned()),
            refresh: c.refresh.as_ref().map(|t| t.expose().to_owned()),
        }
    }
}

impl From<StoredCredentials> for Credentials {
    fn from(s: StoredCredentials) -> Self {
        Self {
            access: s.access.filter(|t| !t.is_empty()).map(AccessToken::new),
            refresh: s.refresh.filter(|t| !t.is_empty()).map(RefreshToken::new),
        }
    }
}

/// File-backed store.
///
/// The in-memory copy is authoritative for reads. Every write updates memory
/// first and then persists; if persisting fails the new credentials are still
/// in effect for this process and the error is returned to the caller.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Credentials>,
}

impl FileCredentialStore {
    /// Load credentials from `path`.
    ///
    /// A missing file is a cold start: it is created as `{}` and the store
    /// begins empty (no session).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredCredentials = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let credentials = Credentials::from(stored);
            info!(
                path = %path.display(),
                has_access = credentials.access.is_some(),
                has_refresh = credentials.refresh.is_some(),
                "loaded credentials"
            );
            credentials
        } else {
            info!(path = %path.display(), "credential file not found, starting without a session");
            let credentials = Credentials::default();
            write_atomic(&path, &credentials).await?;
            credentials
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn read(&self) -> StoreFuture<'_, Option<AccessToken>> {
        Box::pin(async move { self.state.lock().await.access.clone() })
    }

    fn refresh_token(&self) -> StoreFuture<'_, Option<RefreshToken>> {
        Box::pin(async move { self.state.lock().await.refresh.clone() })
    }

    fn write(
        &self,
        access: AccessToken,
        refresh: Option<RefreshToken>,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.replace(access, refresh);
            write_atomic(&self.path, &state).await
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = Credentials::default();
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write credentials to a file atomically.
///
/// Writes a temp file in the same directory, then renames it over the target.
/// Mode 0600 on unix since the file holds bearer tokens.
async fn write_atomic(path: &Path, credentials: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(&StoredCredentials::from(credentials))
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

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
