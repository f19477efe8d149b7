//! JSON-RPC 2.0 wire types shared by the stdio session, HTTP/SSE federation sources, and the
//! tool-gateway HTTP shim (§4.6, §4.8).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC id: either a string or a number, canonicalized to a string key for the pending map
/// (§4.6: "the session canonicalizes via JSON-marshal to produce a stable map key").
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// Stable string key for the pending-call map, independent of the id's wire representation.
    pub fn as_key(&self) -> String {
        match self {
            RequestId::String(s) => format!("s:{s}"),
            RequestId::Number(n) => format!("n:{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", id: Some(id), method: method.into(), params: Some(params) }
    }

    /// A notification: a request with no id (§6: "the HTTP shim returns 202 Accepted with no body").
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", id: None, method: method.into(), params }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    /// §4.6 default used "when the wire error is empty".
    pub fn internal_error() -> Self {
        Self { code: -32603, message: "internal error".to_string(), data: None }
    }
}

/// Response payload shape returned to the HTTP layer (§4.6): either `result` or `error`, never
/// both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn failure(id: RequestId, error: JsonRpcErrorObject) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Parses a response line, filling in a default internal-error body when the wire payload's
    /// `error` is empty/malformed (§4.6).
    pub fn from_wire(raw: &Value, fallback_id: RequestId) -> Self {
        let id = raw
            .get("id")
            .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok())
            .unwrap_or(fallback_id);
        if let Some(err) = raw.get("error") {
            let error = serde_json::from_value::<JsonRpcErrorObject>(err.clone())
                .unwrap_or_else(|_| JsonRpcErrorObject::internal_error());
            return JsonRpcResponse::failure(id, error);
        }
        JsonRpcResponse::success(id, raw.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_key_distinguishes_string_and_number() {
        assert_ne!(RequestId::from("1").as_key(), RequestId::from(1i64).as_key());
    }

    #[test]
    fn notification_has_no_id() {
        let n = JsonRpcRequest::notification("notifications/initialized", None);
        assert!(n.is_notification());
        let v = serde_json::to_value(&n).unwrap();
        assert!(v.get("id").is_none() || v["id"].is_null());
    }

    #[test]
    fn from_wire_defaults_to_internal_error_on_empty_error_object() {
        let raw = serde_json::json!({"jsonrpc": "2.0", "id": "1", "error": {}});
        let resp = JsonRpcResponse::from_wire(&raw, RequestId::from("1"));
        assert!(resp.is_error());
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32603);
        assert_eq!(err.message, "internal error");
    }
}
