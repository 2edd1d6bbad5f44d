//! Error types for session and credential operations

/// Errors from login, refresh, logout and credential persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The auth endpoint could not be reached or did not answer
    #[error("auth endpoint unreachable: {0}")]
    Unreachable(String),

    /// The server answered but refused or garbled the operation
    #[error("auth operation rejected: {0}")]
    Rejected(String),

    /// Credentials were refused (bad password, revoked refresh token)
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("session has no refresh token")]
    MissingRefreshToken,

    /// The session was cleared while an operation was in flight
    #[error("no active session")]
    NoSession,

    #[error("failed to encode credential: {0}")]
    Encode(String),

    #[error("credential file error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
