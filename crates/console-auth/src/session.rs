//! Session lifecycle state machine
//!
//! Pure state machine: receives events, returns the new state. The credential
//! store owns the data and applies each transition as it mutates it.
//!
//! ```text
//! Unauthenticated --LoginSucceeded-->     Authenticated
//! Authenticated   --RefreshSucceeded-->   Authenticated
//! Authenticated   --RefreshUnavailable--> Unauthenticated
//! Authenticated   --RefreshFailed-->      Unauthenticated
//! Authenticated   --LoggedOut-->          Unauthenticated
//! ```
//!
//! Unauthenticated is only left through a login. A refresh that completes
//! after the session was cleared must not bring it back.

/// Whether a usable credential is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
        }
    }
}

/// Events that drive session transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoginSucceeded,
    RefreshSucceeded,
    /// Authorization failure with no refresh token to renew with
    RefreshUnavailable,
    RefreshFailed,
    LoggedOut,
}

/// Why credentials are being cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    Logout,
    NoRefreshToken,
    RefreshFailed,
}

impl ClearReason {
    pub fn event(self) -> SessionEvent {
        match self {
            ClearReason::Logout => SessionEvent::LoggedOut,
            ClearReason::NoRefreshToken => SessionEvent::RefreshUnavailable,
            ClearReason::RefreshFailed => SessionEvent::RefreshFailed,
        }
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ClearReason::Logout => "logout",
            ClearReason::NoRefreshToken => "no_refresh_token",
            ClearReason::RefreshFailed => "refresh_failed",
        }
    }
}

/// Apply one event.
pub fn transition(state: SessionState, event: SessionEvent) -> SessionState {
    match (state, event) {
        (_, SessionEvent::LoginSucceeded) => SessionState::Authenticated,
        (SessionState::Authenticated, SessionEvent::RefreshSucceeded) => {
            SessionState::Authenticated
        }
        (SessionState::Unauthenticated, SessionEvent::RefreshSucceeded) => {
            SessionState::Unauthenticated
        }
        (
            _,
            SessionEvent::RefreshUnavailable
            | SessionEvent::RefreshFailed
            | SessionEvent::LoggedOut,
        ) => SessionState::Unauthenticated,
    }
}
