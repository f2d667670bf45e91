//! JSON request/response envelope
//!
//! Every call arrives as `{id, version, timestamp, service, method, input}`
//! and leaves as `{id, success, data}` or `{id, success:false, error}`.
//! The envelope is the stable IPC shape: the HTTP binding is replaceable
//! without touching the services.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pv_types::CoreError;

/// Envelope version accepted by this surface.
pub const ENVELOPE_VERSION: &str = "2.0";

/// An incoming RPC call.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Service identity, e.g. `PricesService@2.0.0`
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub input: Value,
}

/// Wire shape of an error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// An outgoing reply.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    pub fn success(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Build a failure reply. System-class errors are rewritten to
    /// `INTERNAL_ERROR` with no details before they reach the wire.
    pub fn failure(id: impl Into<String>, err: &CoreError) -> Self {
        let (code, message) = err.public_parts();
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(RpcErrorBody {
                code: code.as_str().to_string(),
                message,
                details: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_defaulted_input() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"id":"1","version":"2.0","service":"HealthService@1.0.0","method":"live"}"#,
        )
        .unwrap();
        assert_eq!(request.method, "live");
        assert!(request.input.is_null());
    }

    #[test]
    fn failure_reply_hides_internal_details() {
        let err = CoreError::Database {
            detail: "pg host 10.1.1.1 unreachable".into(),
        };
        let response = RpcResponse::failure("7", &err);
        let error = response.error.unwrap();
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert!(!error.message.contains("10.1.1.1"));
    }

    #[test]
    fn validation_failure_keeps_its_code() {
        let err = CoreError::InvalidPair {
            value: "doge-usd".into(),
        };
        let response = RpcResponse::failure("7", &err);
        assert_eq!(response.error.unwrap().code, "INVALID_PAIR");
    }
}
