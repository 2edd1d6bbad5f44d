//! Error types for authenticated requests

use transport::TransportError;

/// Errors surfaced to callers of `AuthenticatedTransport::send`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not an authorization failure; propagated unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Authorization failure that could not be recovered: no refresh token,
    /// failed refresh, or a replay that was rejected again
    #[error("unauthorized: {0}")]
    Unauthorized(TransportError),

    #[error("token refresh failed: {0}")]
    Refresh(#[source] console_auth::Error),
}

impl Error {
    /// Whether the session is no longer usable and the user must sign in.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_) | Error::Refresh(_))
    }

    /// The underlying transport failure, if there was one.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Error::Transport(e) | Error::Unauthorized(e) => Some(e),
            Error::Refresh(_) => None,
        }
    }
}

/// Result alias for authenticated requests.
pub type Result<T> = std::result::Result<T, Error>;
