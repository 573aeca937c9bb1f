//! HTTP forwarder for upstream JSON-RPC calls.
//!
//! The forwarder never returns an error to the relay path: every outcome is
//! a JSON body plus a success flag. Network failures and timeouts become a
//! synthesized `-32603` envelope; bodies that are not valid JSON become a
//! `-32700` envelope; everything else, including upstream JSON-RPC errors,
//! passes through unchanged with `success` reflecting HTTP success and the
//! absence of an `error` field.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use crate::types::JsonRpcResponse;

/// Default timeout for relayed calls.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Shorter timeout for operator-initiated endpoint probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for forwarder construction. Forwarding itself cannot fail.
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("http client build failed: {0}")]
    ClientBuild(String),
}

/// Settled outcome of one forwarded call.
#[derive(Debug, Clone)]
pub struct Forwarded {
    /// Body to return to the caller: the upstream's decoded JSON, or a
    /// synthesized error envelope.
    pub body: serde_json::Value,
    /// HTTP success AND no JSON-RPC `error` field in the decoded body.
    pub success: bool,
}

impl Forwarded {
    fn synthesized(response: JsonRpcResponse) -> Self {
        Self {
            body: serde_json::to_value(response).unwrap_or(serde_json::Value::Null),
            success: false,
        }
    }
}

/// Forwards inbound JSON-RPC payloads to upstream providers over a pooled
/// HTTP client.
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Creates a forwarder with a pooled, TLS-enabled client.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::ClientBuild`] if the underlying reqwest
    /// client fails to build.
    pub fn new() -> Result<Self, ForwarderError> {
        let client = reqwest::ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .user_agent("relaygate/0.1.0")
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                ForwarderError::ClientBuild(e.to_string())
            })?;

        Ok(Self { client })
    }

    /// Forwards `payload` to `url` with the given timeout and settles the
    /// outcome into a body the caller can always return.
    pub async fn forward(&self, url: &str, payload: Bytes, timeout: Duration) -> Forwarded {
        let result = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(payload)
            .timeout(timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(url, "upstream request timed out");
                return Forwarded::synthesized(JsonRpcResponse::internal_error(
                    "upstream timeout",
                ));
            }
            Err(e) => {
                let sanitized = sanitize_network_error(&e);
                tracing::warn!(url, error = sanitized, "upstream request failed");
                return Forwarded::synthesized(JsonRpcResponse::internal_error(format!(
                    "upstream unreachable: {sanitized}"
                )));
            }
        };

        let http_ok = response.status().is_success();
        let status = response.status().as_u16();

        let raw = match response.bytes().await {
            Ok(raw) => raw,
            Err(_) => {
                tracing::warn!(url, status, "failed to read upstream response body");
                return Forwarded::synthesized(JsonRpcResponse::internal_error(
                    "upstream response body error",
                ));
            }
        };

        let body: serde_json::Value = match serde_json::from_slice(&raw) {
            Ok(body) => body,
            Err(_) => {
                tracing::warn!(url, status, "upstream returned non-JSON body");
                return Forwarded::synthesized(JsonRpcResponse::parse_error(
                    "upstream returned invalid JSON",
                ));
            }
        };

        let has_rpc_error = body.get("error").is_some_and(|e| !e.is_null());

        Forwarded { body, success: http_ok && !has_rpc_error }
    }
}

/// Reduces network errors to fixed phrases so upstream URLs and connection
/// details never leak into caller-visible envelopes.
fn sanitize_network_error(error: &reqwest::Error) -> &'static str {
    if error.is_connect() {
        "connection refused or unreachable"
    } else if error.is_timeout() {
        "connection timed out"
    } else if error.is_request() {
        "request failed"
    } else if error.is_body() {
        "response body error"
    } else if error.is_decode() {
        "response decode error"
    } else if error.is_redirect() {
        "too many redirects"
    } else {
        "network error"
    }
}
