//! Credential storage for the console session
//!
//! Holds the current access/refresh token pair and the signed-in user. Reads
//! are synchronous snapshots of in-memory state so request paths never wait
//! on disk. Writes are serialized by a tokio Mutex held across the in-memory
//! update and the file write, so the file always reflects the latest state.
//!
//! The backing store is chosen once per session, at login:
//! - `Persistence::Remember` writes the credential file (atomic temp-file +
//!   rename, mode 0600) and every refresh rewrites it.
//! - `Persistence::Session` keeps the credential in memory only and removes
//!   any file left behind by an earlier remembered session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{ClearReason, SessionEvent, SessionState, transition};

/// The signed-in user as reported by the login payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Role name, e.g. "admin" or "contributor"
    pub role: String,
    pub is_active: bool,
}

/// Access/refresh token pair plus the user they belong to.
///
/// `expires_at` is a unix timestamp in milliseconds, computed from the
/// `expires_in` delta at the time the token was issued.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub user: UserIdentity,
}

impl Credential {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        user: UserIdentity,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: expires_in.map(expires_at_from),
            user,
        }
    }

    /// Whether the access token is past its expiry. Unknown expiry counts as
    /// not expired; the server is the authority.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_millis)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Where the credential lives for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Persist to the credential file ("remember me")
    Remember,
    /// Memory only, gone when the process exits
    Session,
}

impl Persistence {
    pub fn label(&self) -> &'static str {
        match self {
            Persistence::Remember => "remember",
            Persistence::Session => "session",
        }
    }
}

struct Held {
    credential: Credential,
    persistence: Persistence,
}

/// Thread-safe credential holder with optional file persistence.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: RwLock<Option<Held>>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store backed by `path`, restoring a remembered session.
    ///
    /// A missing file starts Unauthenticated. A file that cannot be parsed is
    /// removed and the store starts Unauthenticated rather than failing.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let held = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            match serde_json::from_str::<Credential>(&contents) {
                Ok(credential) => {
                    info!(path = %path.display(), user = %credential.user.email, "restored remembered session");
                    Some(Held {
                        credential,
                        persistence: Persistence::Remember,
                    })
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable credential file");
                    remove_if_exists(&path).await?;
                    None
                }
            }
        } else {
            debug!(path = %path.display(), "no credential file, starting unauthenticated");
            None
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(held),
            write_lock: Mutex::new(()),
        })
    }

    /// A store with no file backing. `Persistence::Remember` behaves like
    /// `Persistence::Session`.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the full credential.
    pub fn credential(&self) -> Option<Credential> {
        self.read().as_ref().map(|held| held.credential.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read()
            .as_ref()
            .map(|held| held.credential.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read()
            .as_ref()
            .and_then(|held| held.credential.refresh_token.clone())
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.read()
            .as_ref()
            .map(|held| held.credential.user.clone())
    }

    pub fn persistence(&self) -> Option<Persistence> {
        self.read().as_ref().map(|held| held.persistence)
    }

    pub fn state(&self) -> SessionState {
        if self.read().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Install a credential after login, choosing its backing store.
    pub async fn set(&self, credential: Credential, persistence: Persistence) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let from = self.state();
        let to = transition(from, SessionEvent::LoginSucceeded);

        let snapshot = credential.clone();
        *self.write() = Some(Held {
            credential,
            persistence,
        });
        info!(
            from = from.label(),
            to = to.label(),
            persistence = persistence.label(),
            user = %snapshot.user.email,
            "session established"
        );

        match (&self.path, persistence) {
            (Some(path), Persistence::Remember) => write_atomic(path, &snapshot).await,
            (Some(path), Persistence::Session) => remove_if_exists(path).await,
            (None, _) => Ok(()),
        }
    }

    /// Apply a refresh result.
    ///
    /// The access token is always replaced. The refresh token is replaced only
    /// when the endpoint rotated it; otherwise the previous one stays valid.
    /// Fails with `NoSession` if the session was cleared in the meantime.
    pub async fn update_tokens(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if transition(self.state(), SessionEvent::RefreshSucceeded)
            == SessionState::Unauthenticated
        {
            return Err(Error::NoSession);
        }

        let rotated = refresh_token.is_some();
        let (snapshot, persistence) = {
            let mut state = self.write();
            let held = state.as_mut().ok_or(Error::NoSession)?;
            held.credential.access_token = access_token;
            if let Some(refresh) = refresh_token {
                held.credential.refresh_token = Some(refresh);
            }
            if let Some(expires_in) = expires_in {
                held.credential.expires_at = Some(expires_at_from(expires_in));
            }
            (held.credential.clone(), held.persistence)
        };
        debug!(rotated, "updated session tokens");

        match (&self.path, persistence) {
            (Some(path), Persistence::Remember) => write_atomic(path, &snapshot).await,
            _ => Ok(()),
        }
    }

    /// Drop the credential and remove any persisted copy.
    pub async fn clear(&self, reason: ClearReason) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let from = self.state();
        let to = transition(from, reason.event());
        *self.write() = None;
        info!(
            from = from.label(),
            to = to.label(),
            reason = reason.label(),
            "session cleared"
        );

        match &self.path {
            Some(path) => remove_if_exists(path).await,
            None => Ok(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Held>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Held>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn expires_at_from(expires_in_secs: u64) -> u64 {
    now_millis().saturating_add(expires_in_secs.saturating_mul(1000))
}

/// Write the credential atomically: temp file in the same directory, 0600,
/// then rename over the target.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::Encode(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

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

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed credential file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
    }
}
