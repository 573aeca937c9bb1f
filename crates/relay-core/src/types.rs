//! Core type definitions for the JSON-RPC relay path.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: protocol conformance
//! - Envelope constructors for the two error shapes the gateway synthesizes itself
//!   ([`JsonRpcResponse::parse_error`], [`JsonRpcResponse::internal_error`])
//!
//! ## Accounting Types
//! - [`RelayRecord`]: one forwarded call, immutable after creation
//!
//! # Performance Notes
//!
//! The `jsonrpc` field uses `Cow<'static, str>` so constructing envelopes never
//! allocates for the version string, and response ids use `Arc<serde_json::Value>`
//! so echoing a request id is a reference-count bump rather than a deep clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 parse error code, synthesized when an upstream returns a body
/// that cannot be decoded as JSON.
pub const PARSE_ERROR_CODE: i32 = -32700;

/// JSON-RPC 2.0 internal error code, synthesized when the upstream is
/// unreachable or times out.
pub const INTERNAL_ERROR_CODE: i32 = -32603;

/// JSON-RPC 2.0 request structure.
///
/// Represents an inbound RPC request conforming to the JSON-RPC 2.0
/// specification. The gateway forwards request bodies verbatim, so this type
/// is used for inspection (method extraction, validation in tests) rather
/// than re-serialization on the relay path.
///
/// # Example
///
/// ```
/// use relay_core::types::JsonRpcRequest;
///
/// let request = JsonRpcRequest::new("eth_blockNumber", None, serde_json::json!(1));
/// assert_eq!(request.method, "eth_blockNumber");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 response structure.
///
/// A response contains either a `result` (success) or an `error` (failure),
/// never both. The gateway itself only ever *constructs* the error shape, for
/// the two conditions it downgrades rather than propagates: unparsable
/// upstream bodies and network failures. Everything else is passed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response.
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error JSON-RPC response with the given code and message.
    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }

    /// Synthesized envelope for an upstream body that was not valid JSON.
    ///
    /// The inbound id is unknown at this point (the gateway does not parse
    /// inbound payloads beyond method extraction), so the id is `null`.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(PARSE_ERROR_CODE, message.into(), Arc::new(serde_json::Value::Null))
    }

    /// Synthesized envelope for an unreachable or timed-out upstream.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::error(INTERNAL_ERROR_CODE, message.into(), Arc::new(serde_json::Value::Null))
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard error codes follow the JSON-RPC 2.0 convention:
///
/// - `-32700`: Parse error (invalid JSON)
/// - `-32600`: Invalid request (malformed JSON-RPC)
/// - `-32601`: Method not found
/// - `-32603`: Internal error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One forwarded RPC call, recorded for accounting and inspection.
///
/// Created once per relay after the upstream settles; never mutated, only
/// summed into aggregates. `success` reflects HTTP success *and* the absence
/// of a JSON-RPC `error` field in the decoded upstream body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRecord {
    /// RPC method name extracted from the inbound payload.
    pub method: String,
    /// Wall-clock time the relay settled.
    pub timestamp: DateTime<Utc>,
    /// End-to-end upstream latency in milliseconds.
    pub latency_ms: u64,
    /// Whether the relay succeeded from the caller's perspective.
    pub success: bool,
}

impl RelayRecord {
    /// Creates a record stamped with the current wall-clock time.
    #[must_use]
    pub fn new(method: impl Into<String>, latency_ms: u64, success: bool) -> Self {
        Self { method: method.into(), timestamp: Utc::now(), latency_ms, success }
    }
}

/// Extracts the `method` field from a raw JSON-RPC payload without a full parse.
///
/// Returns `None` for non-object payloads (including batches) and payloads
/// that are not valid JSON. The relay path forwards such bodies regardless;
/// the method name is only used for accounting labels.
#[must_use]
pub fn extract_method(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value.get("method")?.as_str().map(ToString::to_string)
}
