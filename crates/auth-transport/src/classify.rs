//! Authorization failure detection
//!
//! Distinguishes failures that mean "your credentials are not accepted" from
//! everything else. Only authorization failures are eligible for the
//! refresh-and-replay cycle; all other errors pass through untouched.

use console_auth::AUTH_ERROR_CODES;
use transport::TransportError;

/// How the authenticated transport treats a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Credentials missing, invalid or expired: refresh and replay
    Authorization,
    /// Anything else: propagate unchanged
    Passthrough,
}

impl FailureClass {
    pub fn is_authorization(self) -> bool {
        self == FailureClass::Authorization
    }
}

/// Classify a transport failure.
///
/// Authorization failure = HTTP 401, or any GraphQL error whose
/// `extensions.code` is `UNAUTHENTICATED` or `UNAUTHORIZED`. A 403 is not an
/// authorization failure here: the caller is known but not allowed, and a new
/// token would not change that.
pub fn classify(error: &TransportError) -> FailureClass {
    if error.status() == Some(401) {
        return FailureClass::Authorization;
    }
    let unauthorized = error
        .graphql_errors()
        .iter()
        .filter_map(|e| e.code())
        .any(|code| AUTH_ERROR_CODES.contains(&code));
    if unauthorized {
        FailureClass::Authorization
    } else {
        FailureClass::Passthrough
    }
}
