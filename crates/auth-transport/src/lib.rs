//! Authenticated transport for the magazine GraphQL API
//!
//! Wraps any `Transport` and makes expired sessions invisible to callers when
//! they can be renewed. Every request carries the current bearer token. When
//! a request fails with an authorization error, the transport refreshes the
//! token once and replays the request with the new one.
//!
//! Request lifecycle:
//! 1. Attach `authorization: Bearer <access token>` and send
//! 2. Success or non-authorization failure → returned as is
//! 3. Authorization failure with no refresh token → session cleared, error returned
//! 4. Otherwise the first such request refreshes; concurrent ones queue behind it
//! 5. Every request is replayed once with the refreshed token (or unchanged
//!    if the refresh failed); a second authorization failure is terminal

pub mod authenticated;
pub mod classify;
pub mod error;
pub mod metrics;
pub mod refresh;

pub use authenticated::AuthenticatedTransport;
pub use classify::{FailureClass, classify};
pub use error::{Error, Result};
pub use refresh::RefreshCoordinator;
