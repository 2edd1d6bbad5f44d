//! Shared types for the magazine console workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
