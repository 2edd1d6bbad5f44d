//! Transport abstraction for the magazine GraphQL API
//!
//! Defines the `Transport` trait that decouples request issuing from the
//! network layer. `HttpTransport` performs real POSTs against the GraphQL
//! endpoint; the authenticated wrapper in `auth-transport` and test doubles
//! implement or consume the same trait.
//!
//! A transport never retries and never interprets authorization failures. It
//! reports what happened as a `TransportError` so callers can classify it.

pub mod http;

pub use http::{HeaderInjection, HttpTransport};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// An outbound request. The body is opaque to the transport layer; GraphQL
/// requests use the `{query, variables, operationName}` envelope.
#[derive(Debug, Clone)]
pub struct Request {
    /// Operation name for logging, if known
    pub operation: Option<String>,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl Request {
    /// Build a GraphQL request envelope.
    pub fn graphql(query: &str, variables: serde_json::Value) -> Self {
        Self {
            operation: None,
            headers: HeaderMap::new(),
            body: serde_json::json!({
                "query": query,
                "variables": variables,
            }),
        }
    }

    /// Attach an operation name, both for logs and in the GraphQL envelope.
    pub fn with_operation(mut self, name: &str) -> Self {
        if let Some(envelope) = self.body.as_object_mut() {
            envelope.insert("operationName".into(), name.into());
        }
        self.operation = Some(name.to_string());
        self
    }

    /// Current `authorization` header value, if any.
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    /// Replace the `authorization` header.
    ///
    /// `Some(token)` produces `Bearer <token>`; `None` produces an empty value,
    /// matching what the API expects from an anonymous caller.
    pub fn set_bearer(&mut self, token: Option<&str>) -> Result<()> {
        let value = match token {
            Some(token) => HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::InvalidRequest(format!("invalid token value: {e}")))?,
            None => HeaderValue::from_static(""),
        };
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// A successful response. `body` is the full decoded JSON document.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    /// The `data` member of a GraphQL response.
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.body.get("data").filter(|d| !d.is_null())
    }
}

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GraphQlError {
    /// `extensions.code`, the application-level error code.
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(|code| code.as_str())
    }
}

/// Errors reported by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request could not be built: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("GraphQL errors: {}", join_messages(.errors))]
    GraphQl {
        errors: Vec<GraphQlError>,
        /// Partial data returned alongside the errors
        data: Option<serde_json::Value>,
    },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// GraphQL errors, empty for non-GraphQL failures.
    pub fn graphql_errors(&self) -> &[GraphQlError] {
        match self {
            TransportError::GraphQl { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Abstraction over request execution.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Execute one request. Implementations must not retry.
    fn send<'a>(
        &'a self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;
}
