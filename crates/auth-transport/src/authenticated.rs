//! Bearer injection with transparent token refresh and replay
//!
//! `AuthenticatedTransport` is constructed once at startup and shared via
//! `Arc`. It owns the refresh coordinator, so the single-flight guarantee holds
//! per instance: for N requests failing with an authorization error while no
//! refresh runs, exactly one refresh call is made and all N are replayed after
//! it settles.

use std::sync::Arc;

use console_auth::{ClearReason, CredentialStore, RefreshEndpoint};
use tracing::{debug, info, warn};
use transport::{Request, Response, Transport};

use crate::classify::classify;
use crate::error::{Error, Result};
use crate::metrics;
use crate::refresh::{RefreshCoordinator, RefreshOutcome, Ticket};

pub struct AuthenticatedTransport {
    inner: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    refresher: Arc<dyn RefreshEndpoint>,
    coordinator: RefreshCoordinator,
}

impl AuthenticatedTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        refresher: Arc<dyn RefreshEndpoint>,
    ) -> Self {
        info!(transport = inner.id(), "authenticated transport initialized");
        Self {
            inner,
            credentials,
            refresher,
            coordinator: RefreshCoordinator::new(),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Whether a token refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    /// Send a request with the current access token.
    ///
    /// Authorization failures are recovered through one refresh-and-replay
    /// cycle when a refresh token is held. Other failures are returned as
    /// `Error::Transport` without any retry.
    pub async fn send(&self, mut request: Request) -> Result<Response> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let token = self.credentials.access_token();
        request.set_bearer(token.as_deref())?;

        let error = match self.inner.send(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        if !classify(&error).is_authorization() {
            return Err(Error::Transport(error));
        }

        if self.credentials.refresh_token().is_none() {
            info!(
                request_id = %request_id,
                operation = ?request.operation,
                error = %error,
                "authorization failed with no refresh token, signing out"
            );
            self.clear(ClearReason::NoRefreshToken).await;
            return Err(Error::Unauthorized(error));
        }

        debug!(
            request_id = %request_id,
            operation = ?request.operation,
            error = %error,
            "authorization failed, renewing access token"
        );
        let outcome = self.renewed_token().await;
        self.replay(&request_id, request, outcome).await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// On success the store is updated (refresh token only if rotated) and
    /// persisted. On failure the session is cleared, unless it was already
    /// cleared while the refresh ran. Not single-flight on its own: concurrent
    /// callers must go through `send`.
    pub async fn refresh_access_token(&self) -> Result<String> {
        match self.exchange_refresh_token().await {
            Ok(token) => {
                metrics::record_refresh("success");
                Ok(token)
            }
            // Already signed out mid-refresh; that clear was recorded
            Err(e @ Error::Refresh(console_auth::Error::NoSession)) => {
                info!("session ended during token refresh, discarding new token");
                Err(e)
            }
            Err(e) => {
                metrics::record_refresh("failure");
                warn!(error = %e, "token refresh failed, signing out");
                self.clear(ClearReason::RefreshFailed).await;
                Err(e)
            }
        }
    }

    async fn exchange_refresh_token(&self) -> Result<String> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .ok_or(Error::Refresh(console_auth::Error::MissingRefreshToken))?;

        let token = self
            .refresher
            .refresh(&refresh_token)
            .await
            .map_err(Error::Refresh)?;

        let rotated = token.refresh_token.is_some();
        match self
            .credentials
            .update_tokens(
                token.access_token.clone(),
                token.refresh_token,
                token.expires_in,
            )
            .await
        {
            Ok(()) => {}
            // Signed out while the refresh was in flight; do not revive
            Err(console_auth::Error::NoSession) => {
                return Err(Error::Refresh(console_auth::Error::NoSession));
            }
            Err(e) => warn!(error = %e, "failed to persist refreshed token"),
        }

        info!(rotated, "token refresh succeeded");
        Ok(token.access_token)
    }

    /// Wait for (or perform) the refresh shared by all concurrent failures.
    async fn renewed_token(&self) -> RefreshOutcome {
        match self.coordinator.join() {
            Ticket::Follower(waiter) => {
                metrics::record_queued();
                // A dropped sender means the leader vanished without settling
                waiter.await.ok().flatten()
            }
            Ticket::Leader(guard) => {
                let outcome = self.refresh_access_token().await.ok();
                let waiters = guard.settle(outcome.clone());
                metrics::record_waiters(waiters);
                debug!(waiters, refreshed = outcome.is_some(), "resumed queued requests");
                outcome
            }
        }
    }

    /// Send the request a second and final time.
    ///
    /// With a token the authorization header is rewritten; without one the
    /// request goes out unchanged and its failure is surfaced.
    async fn replay(
        &self,
        request_id: &str,
        mut request: Request,
        outcome: RefreshOutcome,
    ) -> Result<Response> {
        if let Some(token) = outcome.as_deref() {
            request.set_bearer(Some(token))?;
        }
        let request_operation = request.operation.clone();

        match self.inner.send(request).await {
            Ok(response) => {
                metrics::record_replay("success");
                Ok(response)
            }
            Err(error) if classify(&error).is_authorization() => {
                metrics::record_replay("unauthorized");
                warn!(
                    request_id,
                    operation = ?request_operation,
                    error = %error,
                    refreshed = outcome.is_some(),
                    "replayed request rejected, giving up"
                );
                Err(Error::Unauthorized(error))
            }
            Err(error) => {
                metrics::record_replay("error");
                Err(Error::Transport(error))
            }
        }
    }

    async fn clear(&self, reason: ClearReason) {
        metrics::record_session_cleared(reason.label());
        if let Err(e) = self.credentials.clear(reason).await {
            warn!(error = %e, reason = reason.label(), "failed to remove persisted credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_auth::{
        Credential, Persistence, SessionState, TokenResponse, UserIdentity,
    };
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use transport::{GraphQlError, TransportError};

    /// Accepts exactly one bearer value; rejects everything else with
    /// `rejection`. Records `(label, authorization)` for every call.
    struct MockTransport {
        accepted: Option<String>,
        rejection: TransportError,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl MockTransport {
        fn new(accepted: Option<&str>, rejection: TransportError) -> Arc<Self> {
            Arc::new(Self {
                accepted: accepted.map(|t| format!("Bearer {t}")),
                rejection,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn id(&self) -> &str {
            "mock"
        }

        fn send<'a>(
            &'a self,
            request: Request,
        ) -> Pin<Box<dyn Future<Output = transport::Result<Response>> + Send + 'a>> {
            Box::pin(async move {
                let label = request.body["variables"]["label"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let auth = request.authorization().unwrap_or_default().to_string();
                self.calls.lock().unwrap().push((label.clone(), auth.clone()));
                if self.accepted.as_deref() == Some(auth.as_str()) {
                    Ok(Response {
                        status: 200,
                        body: serde_json::json!({ "data": { "label": label } }),
                    })
                } else {
                    Err(self.rejection.clone())
                }
            })
        }
    }

    enum RefreshBehavior {
        Rotate(&'static str, &'static str),
        AccessOnly(&'static str),
        Fail,
        /// Sign the user out mid-refresh, then succeed
        SignOutThenSucceed(Arc<CredentialStore>),
    }

    struct MockRefresh {
        behavior: RefreshBehavior,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl MockRefresh {
        fn new(behavior: RefreshBehavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                delay,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshEndpoint for MockRefresh {
        fn refresh<'a>(
            &'a self,
            refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = console_auth::Result<TokenResponse>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.seen.lock().unwrap().push(refresh_token.to_string());
                tokio::time::sleep(self.delay).await;
                match &self.behavior {
                    RefreshBehavior::Rotate(access, refresh) => Ok(TokenResponse {
                        access_token: access.to_string(),
                        refresh_token: Some(refresh.to_string()),
                        expires_in: Some(900),
                    }),
                    RefreshBehavior::AccessOnly(access) => Ok(TokenResponse {
                        access_token: access.to_string(),
                        refresh_token: None,
                        expires_in: None,
                    }),
                    RefreshBehavior::Fail => Err(console_auth::Error::Rejected(
                        "Refresh token revoked".into(),
                    )),
                    RefreshBehavior::SignOutThenSucceed(store) => {
                        store.clear(ClearReason::Logout).await.unwrap();
                        Ok(TokenResponse {
                            access_token: "A2".into(),
                            refresh_token: Some("R2".into()),
                            expires_in: None,
                        })
                    }
                }
            })
        }
    }

    fn unauthorized_401() -> TransportError {
        TransportError::Status {
            status: 401,
            body: "token expired".into(),
        }
    }

    fn unauthenticated_graphql() -> TransportError {
        let mut extensions = serde_json::Map::new();
        extensions.insert("code".into(), "UNAUTHENTICATED".into());
        TransportError::GraphQl {
            errors: vec![GraphQlError {
                message: "Not authenticated".into(),
                path: None,
                extensions: Some(extensions),
            }],
            data: None,
        }
    }

    async fn store_with(access: &str, refresh: Option<&str>) -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::in_memory());
        store
            .set(
                Credential::new(
                    access.to_string(),
                    refresh.map(str::to_string),
                    None,
                    UserIdentity {
                        id: "42".into(),
                        email: "editor@magazine.test".into(),
                        display_name: "Ed Itor".into(),
                        avatar_url: None,
                        role: "editor".into(),
                        is_active: true,
                    },
                ),
                Persistence::Session,
            )
            .await
            .unwrap();
        store
    }

    fn request(label: &str) -> Request {
        Request::graphql(
            "query Articles { articles { id } }",
            serde_json::json!({ "label": label }),
        )
    }

    fn build(
        transport: &Arc<MockTransport>,
        store: &Arc<CredentialStore>,
        refresher: &Arc<MockRefresh>,
    ) -> Arc<AuthenticatedTransport> {
        Arc::new(AuthenticatedTransport::new(
            transport.clone(),
            store.clone(),
            refresher.clone(),
        ))
    }

    #[tokio::test]
    async fn success_passes_through_with_bearer() {
        let transport = MockTransport::new(Some("A1"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::Fail, Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let response = client.send(request("X")).await.unwrap();

        assert_eq!(response.data().unwrap()["label"], "X");
        assert_eq!(transport.calls(), vec![("X".into(), "Bearer A1".into())]);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn anonymous_request_sends_empty_authorization() {
        let transport = MockTransport::new(None, unauthorized_401());
        let store = Arc::new(CredentialStore::in_memory());
        let refresher = MockRefresh::new(RefreshBehavior::Fail, Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let err = client.send(request("X")).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(transport.calls(), vec![("X".into(), String::new())]);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failures_share_one_refresh() {
        let transport = MockTransport::new(Some("A2"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(
            RefreshBehavior::Rotate("A2", "R2"),
            Duration::from_millis(50),
        );
        let client = build(&transport, &store, &refresher);

        let handles: Vec<_> = ["X", "Y", "Z"]
            .into_iter()
            .map(|label| {
                let client = client.clone();
                tokio::spawn(async move { client.send(request(label)).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(refresher.calls(), 1, "exactly one refresh call");
        assert_eq!(*refresher.seen.lock().unwrap(), vec!["R1".to_string()]);
        assert_eq!(
            transport.calls(),
            vec![
                ("X".into(), "Bearer A1".into()),
                ("Y".into(), "Bearer A1".into()),
                ("Z".into(), "Bearer A1".into()),
                ("X".into(), "Bearer A2".into()),
                ("Y".into(), "Bearer A2".into()),
                ("Z".into(), "Bearer A2".into()),
            ],
            "every request fails before the refresh settles and replays in FIFO order"
        );
        assert_eq!(store.access_token().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R2"));
        assert!(!client.is_refreshing());
    }

    #[tokio::test]
    async fn graphql_unauthenticated_code_triggers_refresh() {
        let transport = MockTransport::new(Some("A2"), unauthenticated_graphql());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::Rotate("A2", "R2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let response = client.send(request("X")).await.unwrap();

        assert_eq!(response.data().unwrap()["label"], "X");
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_clears_without_refreshing() {
        let transport = MockTransport::new(None, unauthorized_401());
        let store = store_with("A1", None).await;
        let refresher = MockRefresh::new(RefreshBehavior::Rotate("A2", "R2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let err = client.send(request("W")).await.unwrap_err();

        assert_eq!(refresher.calls(), 0);
        assert_eq!(store.state(), SessionState::Unauthenticated);
        match err {
            Error::Unauthorized(original) => assert_eq!(original.status(), Some(401)),
            other => panic!("expected the original 401, got {other:?}"),
        }
        assert_eq!(transport.calls().len(), 1, "no replay without a refresh token");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_clears_session_and_fails_every_request() {
        let transport = MockTransport::new(None, unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::Fail, Duration::from_millis(50));
        let client = build(&transport, &store, &refresher);

        let handles: Vec<_> = ["X", "Y", "Z"]
            .into_iter()
            .map(|label| {
                let client = client.clone();
                tokio::spawn(async move { client.send(request(label)).await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_unauthorized(), "got: {err:?}");
        }

        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.state(), SessionState::Unauthenticated);
        // Each request replayed once, unchanged, then gave up
        let calls = transport.calls();
        assert_eq!(calls.len(), 6);
        assert!(calls.iter().all(|(_, auth)| auth == "Bearer A1"));
        assert!(!client.is_refreshing());
    }

    #[tokio::test]
    async fn refresh_without_rotation_keeps_refresh_token() {
        let transport = MockTransport::new(Some("A2"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::AccessOnly("A2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        client.send(request("X")).await.unwrap();

        assert_eq!(store.access_token().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn replay_rejected_again_is_terminal() {
        // Server rejects every token, even the refreshed one
        let transport = MockTransport::new(None, unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::Rotate("A2", "R2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let err = client.send(request("X")).await.unwrap_err();

        assert!(matches!(err, Error::Unauthorized(_)), "got: {err:?}");
        assert_eq!(refresher.calls(), 1, "no second refresh for the same request");
        assert_eq!(
            transport.calls(),
            vec![
                ("X".into(), "Bearer A1".into()),
                ("X".into(), "Bearer A2".into()),
            ]
        );
        // The refresh itself succeeded, so the session stays
        assert_eq!(store.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn non_authorization_errors_pass_through() {
        let transport = MockTransport::new(
            None,
            TransportError::Status {
                status: 503,
                body: "maintenance".into(),
            },
        );
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::Rotate("A2", "R2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let err = client.send(request("X")).await.unwrap_err();

        assert!(matches!(err, Error::Transport(ref e) if e.status() == Some(503)), "got: {err:?}");
        assert!(!err.is_unauthorized());
        assert_eq!(refresher.calls(), 0);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(store.access_token().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn sign_out_during_refresh_is_not_undone() {
        let transport = MockTransport::new(Some("A2"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(
            RefreshBehavior::SignOutThenSucceed(store.clone()),
            Duration::ZERO,
        );
        let client = build(&transport, &store, &refresher);

        let err = client.send(request("X")).await.unwrap_err();

        assert!(err.is_unauthorized(), "got: {err:?}");
        assert_eq!(store.state(), SessionState::Unauthenticated);
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn sign_out_during_refresh_is_not_counted_as_refresh_failure() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let transport = MockTransport::new(Some("A2"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(
            RefreshBehavior::SignOutThenSucceed(store.clone()),
            Duration::ZERO,
        );
        let client = build(&transport, &store, &refresher);

        let err = client.refresh_access_token().await.unwrap_err();
        assert!(
            matches!(err, Error::Refresh(console_auth::Error::NoSession)),
            "got: {err:?}"
        );

        let output = handle.render();
        assert!(!output.contains("outcome=\"failure\""), "{output}");
        assert!(!output.contains("reason=\"refresh_failed\""), "{output}");
        assert_eq!(store.state(), SessionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_leader_releases_queued_requests() {
        let transport = MockTransport::new(Some("A2"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(
            RefreshBehavior::Rotate("A2", "R2"),
            Duration::from_secs(3600),
        );
        let client = build(&transport, &store, &refresher);

        let leader = {
            let client = client.clone();
            tokio::spawn(async move { client.send(request("X")).await })
        };
        let follower = {
            let client = client.clone();
            tokio::spawn(async move { client.send(request("Y")).await })
        };

        // Let both reach their suspension points
        while transport.calls().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(client.is_refreshing());

        leader.abort();

        let err = follower.await.unwrap().unwrap_err();
        assert!(err.is_unauthorized(), "got: {err:?}");
        assert!(!client.is_refreshing());
        // Replayed unchanged with the old token
        assert_eq!(
            transport.calls().last().unwrap(),
            &("Y".to_string(), "Bearer A1".to_string())
        );
    }

    #[tokio::test]
    async fn sequential_failures_refresh_again() {
        let transport = MockTransport::new(None, unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::AccessOnly("A2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        let _ = client.send(request("X")).await;
        let _ = client.send(request("Y")).await;

        assert_eq!(refresher.calls(), 2, "each settled cycle resets the flag");
    }

    #[tokio::test]
    async fn refresh_outcomes_are_counted() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let transport = MockTransport::new(Some("A2"), unauthorized_401());
        let store = store_with("A1", Some("R1")).await;
        let refresher = MockRefresh::new(RefreshBehavior::Rotate("A2", "R2"), Duration::ZERO);
        let client = build(&transport, &store, &refresher);

        client.send(request("X")).await.unwrap();

        let output = handle.render();
        assert!(output.contains("auth_refresh_total{outcome=\"success\"} 1"), "{output}");
        assert!(output.contains("auth_replays_total{outcome=\"success\"} 1"), "{output}");
    }
}
