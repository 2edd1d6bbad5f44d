//! Session credentials and auth operations for the magazine console
//!
//! Provides the credential store, the session lifecycle state machine and the
//! GraphQL auth mutations. This crate knows nothing about request replay; the
//! `auth-transport` crate builds the refresh interceptor on top of it.
//!
//! Credential flow:
//! 1. `AuthClient::login()` → `LoginPayload::into_credential()`
//! 2. `CredentialStore::set()` with the persistence chosen at login
//! 3. On authorization failure, `RefreshEndpoint::refresh()` then
//!    `CredentialStore::update_tokens()`
//! 4. `CredentialStore::clear()` on logout or when renewal is impossible

pub mod constants;
pub mod credentials;
pub mod error;
pub mod session;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialStore, Persistence, UserIdentity, now_millis};
pub use error::{Error, Result};
pub use session::{ClearReason, SessionEvent, SessionState, transition};
pub use token::{
    AuthClient, LoginInput, LoginPayload, RefreshEndpoint, TokenResponse, UserPayload,
};
