//! GraphQL auth operations: login, token refresh, logout
//!
//! These calls go straight to the endpoint with their own reqwest request
//! instead of through the authenticated transport. A refresh that passed
//! through the refresh interceptor could recurse into itself.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::GraphQlError;

use crate::constants::{
    AUTH_ERROR_CODES, DEFAULT_ROLE, LOGIN_MUTATION, LOGOUT_MUTATION, REFRESH_TOKEN_MUTATION,
};
use crate::credentials::{Credential, UserIdentity};
use crate::error::{Error, Result};

/// Payload of the `refreshToken` mutation.
///
/// `refresh_token` is present only when the server rotates it.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// `role { name }` selection.
#[derive(Debug, Deserialize)]
pub struct RoleRef {
    pub name: String,
}

/// User selection shared by the `login` and `me` operations.
#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub role: Option<RoleRef>,
}

impl UserPayload {
    pub fn into_identity(self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            role: self
                .role
                .map(|r| r.name)
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            is_active: self.is_active,
        }
    }
}

/// Payload of the `login` mutation.
#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: UserPayload,
}

impl LoginPayload {
    pub fn into_credential(self) -> Credential {
        Credential::new(
            self.access_token,
            self.refresh_token,
            self.expires_in,
            self.user.into_identity(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct LogoutPayload {
    #[serde(default)]
    success: bool,
}

/// Login form input.
pub struct LoginInput {
    pub email: String,
    pub password: Secret<String>,
}

/// Exchanges a refresh token for a new token pair.
///
/// A seam so the refresh coordinator can be driven by test doubles.
pub trait RefreshEndpoint: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;
}

/// Client for the auth mutations of the magazine API.
#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl AuthClient {
    /// `timeout` bounds each whole request, response body included.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Sign in with email and password.
    pub async fn login(&self, input: &LoginInput) -> Result<LoginPayload> {
        let variables = serde_json::json!({
            "input": {
                "email": input.email.trim(),
                "password": input.password.expose(),
            }
        });
        self.mutate(LOGIN_MUTATION, variables, "login", None).await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let variables = serde_json::json!({
            "input": { "refresh_token": refresh_token }
        });
        self.mutate(REFRESH_TOKEN_MUTATION, variables, "refreshToken", None)
            .await
    }

    /// Invalidate the session server-side. Returns the server's `success` flag.
    pub async fn logout(&self, access_token: Option<&str>) -> Result<bool> {
        let variables = serde_json::json!({ "input": {} });
        let payload: LogoutPayload = self
            .mutate(LOGOUT_MUTATION, variables, "logout", access_token)
            .await?;
        Ok(payload.success)
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: serde_json::Value,
        field: &str,
        bearer: Option<&str>,
    ) -> Result<T> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({
                "query": document,
                "variables": variables,
            }));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Unreachable(format!("{field} timed out after {:?}", self.timeout))
                } else {
                    Error::Unreachable(format!("{field} request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::Unauthenticated(format!(
                    "{field} rejected ({status}): {body}"
                )));
            }
            return Err(Error::Rejected(format!(
                "{field} returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Unreachable(format!("{field} timed out after {:?}", self.timeout))
                } else {
                    Error::Rejected(format!("invalid {field} response: {e}"))
                }
            })?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            let errors: Vec<GraphQlError> = serde_json::from_value(errors.clone())
                .map_err(|e| Error::Rejected(format!("invalid {field} errors: {e}")))?;
            if let Some(first) = errors.first() {
                debug!(field, code = ?first.code(), "auth operation returned errors");
                let rejected = first
                    .code()
                    .is_some_and(|code| AUTH_ERROR_CODES.contains(&code));
                return Err(if rejected {
                    Error::Unauthenticated(first.message.clone())
                } else {
                    Error::Rejected(first.message.clone())
                });
            }
        }

        let payload = body
            .get("data")
            .and_then(|data| data.get(field))
            .filter(|payload| !payload.is_null())
            .ok_or_else(|| Error::Rejected(format!("response has no {field} payload")))?;

        serde_json::from_value(payload.clone())
            .map_err(|e| Error::Rejected(format!("malformed {field} payload: {e}")))
    }
}

impl RefreshEndpoint for AuthClient {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(self.refresh_token(refresh_token))
    }
}
