//! JSON-RPC 2.0 envelope types.
//!
//! The bridge speaks plain JSON-RPC 2.0 over text frames. Only the envelope
//! lives here; method-specific payloads are in [`crate::methods`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The only protocol version the bridge accepts.
pub const JSONRPC_VERSION: &str = "2.0";

/// Errors produced while parsing an inbound envelope.
///
/// Envelope errors are not answered on the wire; the session logs and drops
/// the offending frame.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON or did not have the request shape.
    #[error("invalid JSON-RPC frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The `jsonrpc` field was present but not `"2.0"`.
    #[error("unsupported jsonrpc version: {0:?}")]
    Version(String),
}

/// An inbound request (or id-less notification) from the control client.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Protocol version, must be `"2.0"`.
    pub jsonrpc: String,
    /// Method name, e.g. `discover`.
    pub method: String,
    /// Method parameters. Defaults to `null` when absent.
    #[serde(default)]
    pub params: Value,
    /// Correlation id. Requests without an id never receive a response.
    #[serde(default)]
    pub id: Option<Value>,
}

impl Request {
    /// Parse and validate one text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let request: Request = serde_json::from_str(text)?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(EnvelopeError::Version(request.jsonrpc));
        }
        Ok(request)
    }
}

/// The error object carried in a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Human-readable failure description.
    pub message: String,
}

/// An outbound response to an id-carrying request.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    /// Present on success. `Some(Value::Null)` serializes as `"result":null`,
    /// which is the wire shape of a bare acknowledgment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Echo of the request id.
    pub id: Value,
}

impl Response {
    /// Build a success response.
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Build an error response.
    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(RpcError {
                message: message.into(),
            }),
            id,
        }
    }
}

/// Build a server-push notification. Notifications carry no id.
pub fn notification(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_request_with_id() {
        let req = Request::parse(r#"{"jsonrpc":"2.0","method":"discover","params":{"majorDeviceClass":8},"id":3}"#)
            .unwrap();
        assert_eq!(req.method, "discover");
        assert_eq!(req.id, Some(json!(3)));
        assert_eq!(req.params["majorDeviceClass"], json!(8));
    }

    #[test]
    fn parse_request_without_id_or_params() {
        let req = Request::parse(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert!(req.id.is_none());
        assert!(req.params.is_null());
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let err = Request::parse(r#"{"jsonrpc":"1.0","method":"discover"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Version(v) if v == "1.0"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Request::parse("not json").unwrap_err(),
            EnvelopeError::Json(_)
        ));
    }

    #[test]
    fn result_response_serializes_null_result() {
        let resp = Response::result(json!(7), Value::Null);
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains(r#""result":null"#));
        assert!(text.contains(r#""id":7"#));
        assert!(!text.contains("error"));
    }

    #[test]
    fn error_response_carries_message() {
        let resp = Response::error(json!("abc"), "BT connect failed");
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains(r#""message":"BT connect failed""#));
        assert!(text.contains(r#""id":"abc""#));
        assert!(!text.contains("result"));
    }

    #[test]
    fn notification_has_no_id() {
        let n = notification("didDiscoverPeripheral", json!({"rssi": -40}));
        assert_eq!(n["jsonrpc"], "2.0");
        assert_eq!(n["method"], "didDiscoverPeripheral");
        assert!(n.get("id").is_none());
    }
}
