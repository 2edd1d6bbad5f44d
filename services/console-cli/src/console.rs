//! Session operations behind the CLI subcommands
//!
//! `Console` wires one `CredentialStore`, one `AuthClient` and one
//! `AuthenticatedTransport` together. Login and logout talk to the auth
//! mutations directly; everything else goes through the authenticated
//! transport so expired access tokens are renewed transparently.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use auth_transport::AuthenticatedTransport;
use common::Secret;
use console_auth::{
    AuthClient, ClearReason, CredentialStore, LoginInput, Persistence, UserIdentity,
    CURRENT_USER_QUERY,
};
use tracing::{info, warn};
use transport::{HeaderInjection, HttpTransport, Request};

use crate::config::Config;

pub struct Console {
    auth: Arc<AuthClient>,
    store: Arc<CredentialStore>,
    api: AuthenticatedTransport,
}

impl Console {
    /// Build the client stack from configuration and restore any remembered
    /// session from the credential file.
    pub async fn connect(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.api.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        let store = CredentialStore::load(config.session.credential_file.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to open credential file {}",
                    config.session.credential_file.display()
                )
            })?;

        let injections: Vec<HeaderInjection> = config
            .api
            .headers
            .iter()
            .map(|h| HeaderInjection {
                name: h.name.clone(),
                value: h.value.clone(),
            })
            .collect();
        let http = HttpTransport::new(
            client.clone(),
            config.api.endpoint.clone(),
            timeout,
            &injections,
        );

        Ok(Self::new(
            Arc::new(http),
            Arc::new(store),
            Arc::new(AuthClient::new(
                client,
                config.api.endpoint.clone(),
                timeout,
            )),
        ))
    }

    pub fn new(
        http: Arc<HttpTransport>,
        store: Arc<CredentialStore>,
        auth: Arc<AuthClient>,
    ) -> Self {
        let api = AuthenticatedTransport::new(http, store.clone(), auth.clone());
        Self { auth, store, api }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Sign in and store the resulting credential.
    pub async fn login(
        &self,
        email: &str,
        password: Secret<String>,
        persistence: Persistence,
    ) -> Result<UserIdentity> {
        let payload = self
            .auth
            .login(&LoginInput {
                email: email.to_string(),
                password,
            })
            .await
            .context("login failed")?;

        let credential = payload.into_credential();
        let user = credential.user.clone();
        self.store
            .set(credential, persistence)
            .await
            .context("failed to store session")?;

        info!(user = %user.email, role = %user.role, persistence = persistence.label(), "signed in");
        Ok(user)
    }

    /// Sign out. Local credentials are cleared even when the server call
    /// fails; the return value reports whether the server confirmed.
    pub async fn logout(&self) -> Result<bool> {
        let token = self.store.access_token();
        let confirmed = match token.as_deref() {
            Some(token) => match self.auth.logout(Some(token)).await {
                Ok(success) => success,
                Err(e) => {
                    warn!(error = %e, "server logout failed, clearing local session anyway");
                    false
                }
            },
            None => false,
        };

        self.store
            .clear(ClearReason::Logout)
            .await
            .context("failed to remove credential file")?;
        Ok(confirmed)
    }

    /// Fetch the signed-in user from the API.
    pub async fn whoami(&self) -> Result<serde_json::Value> {
        let request =
            Request::graphql(CURRENT_USER_QUERY, serde_json::json!({})).with_operation("GetCurrentUser");
        let response = self.api.send(request).await?;
        response
            .data()
            .and_then(|data| data.get("me"))
            .filter(|me| !me.is_null())
            .cloned()
            .context("response has no me payload")
    }

    /// Execute an arbitrary GraphQL document and return its `data`.
    pub async fn query(
        &self,
        document: &str,
        variables: serde_json::Value,
        operation: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut request = Request::graphql(document, variables);
        if let Some(name) = operation {
            request = request.with_operation(name);
        }
        let response = self.api.send(request).await?;
        Ok(response.data().cloned().unwrap_or(serde_json::Value::Null))
    }
}
