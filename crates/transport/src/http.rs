//! HTTP transport: POSTs GraphQL envelopes to the configured endpoint.
//!
//! Configured static headers are injected on every request, but never the
//! `authorization` header, which belongs to the authenticated wrapper.
//! Response mapping:
//! - connect/send failure → `Network` (or `Timeout`)
//! - non-2xx status → `Status` with the body text
//! - 2xx with a non-empty `errors` array → `GraphQl`
//! - 2xx that is not JSON → `Decode`

use crate::{GraphQlError, Request, Response, Result, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// reqwest-backed GraphQL transport.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Build a transport for `endpoint`. Invalid header rules are skipped with
    /// a warning rather than failing startup.
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        timeout: Duration,
        injections: &[HeaderInjection],
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            headers: build_static_headers(injections),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let mut headers = self.headers.clone();
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .timeout(self.timeout)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            debug!(status = status.as_u16(), operation = ?request.operation, "endpoint returned error status");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            let errors: Vec<GraphQlError> = serde_json::from_value(errors.clone())
                .map_err(|e| TransportError::Decode(format!("malformed errors array: {e}")))?;
            if !errors.is_empty() {
                let data = body.get("data").filter(|d| !d.is_null()).cloned();
                return Err(TransportError::GraphQl { errors, data });
            }
        }

        Ok(Response {
            status: status.as_u16(),
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

fn build_static_headers(injections: &[HeaderInjection]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == reqwest::header::AUTHORIZATION {
            warn!(header = %injection.name, "refusing to inject authorization header from config");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
    headers
}
