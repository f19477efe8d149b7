//! MCP over the Streamable-HTTP transport: POST one JSON-RPC message per call, parse either a
//! plain JSON body or an SSE-framed body (§4.7 source H).
//!
//! Grounded on the teacher's `session_http.rs`, rewritten against this crate's own
//! `mcp::jsonrpc` types instead of an external MCP SDK, and against `HeaderInjector` instead of
//! an ad-hoc `Vec<(String, String)>`.

use std::sync::Mutex;

use reqwest::Client;
use serde_json::{json, Value};

use crate::error::McpSessionError;
use crate::federation::header_injector::HeaderInjector;
use crate::mcp::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::mcp::session::PROTOCOL_VERSION;

const INITIALIZE_REQUEST_ID: &str = "gateway-mcp-initialize";

/// Parses a JSON-RPC response from an HTTP body that is either `application/json` (a single
/// object) or `text/event-stream` (SSE `data:` lines carrying JSON-RPC messages), returning the
/// first frame that has a `result` or `error` (§4.7).
fn parse_json_rpc_from_body(
    body: &str,
    content_type: Option<&reqwest::header::HeaderValue>,
) -> Result<Value, McpSessionError> {
    let is_sse = content_type
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("text/event-stream"))
        .unwrap_or(false);

    if !is_sse {
        return serde_json::from_str(body)
            .map_err(|e| McpSessionError::Transport(format!("response json: {e}")));
    }

    let mut data_buffer = String::new();
    let mut try_flush = |buf: &mut String| -> Option<Value> {
        if buf.is_empty() {
            return None;
        }
        let parsed: Value = serde_json::from_str(buf).ok()?;
        let hit = parsed.get("result").is_some() || parsed.get("error").is_some();
        buf.clear();
        hit.then_some(parsed)
    };

    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim_start();
            if data == "[DONE]" || data.is_empty() {
                if let Some(v) = try_flush(&mut data_buffer) {
                    return Ok(v);
                }
                continue;
            }
            if data_buffer.is_empty() {
                data_buffer = data.to_string();
            } else {
                data_buffer.push('\n');
                data_buffer.push_str(data);
            }
            if let Some(parsed) = serde_json::from_str::<Value>(&data_buffer).ok() {
                if parsed.get("result").is_some() || parsed.get("error").is_some() {
                    return Ok(parsed);
                }
            }
        } else if line.trim().is_empty() {
            if let Some(v) = try_flush(&mut data_buffer) {
                return Ok(v);
            }
        }
    }
    if let Some(v) = try_flush(&mut data_buffer) {
        return Ok(v);
    }
    Err(McpSessionError::Transport(
        "SSE stream: no JSON-RPC response found".to_string(),
    ))
}

/// One remote HTTP MCP endpoint, reached by POSTing a JSON-RPC frame per call and tracking the
/// server-assigned `MCP-Session-Id`.
pub struct HttpMcpSource {
    client: Client,
    url: String,
    headers: HeaderInjector,
    session_id: Mutex<Option<String>>,
}

impl HttpMcpSource {
    pub async fn connect(
        url: impl Into<String>,
        headers: HeaderInjector,
    ) -> Result<Self, McpSessionError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| McpSessionError::Transport(e.to_string()))?;
        let source = Self { client, url: url.into(), headers, session_id: Mutex::new(None) };
        source.initialize().await?;
        Ok(source)
    }

    async fn initialize(&self) -> Result<(), McpSessionError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "clientInfo": {"name": "gateway", "version": env!("CARGO_PKG_VERSION")},
        });
        let request = JsonRpcRequest::call(RequestId::from(INITIALIZE_REQUEST_ID), "initialize", params);
        if let Some(body) = self.send_raw(&request).await? {
            if body.get("error").is_some() {
                return Err(McpSessionError::Initialize(
                    body["error"]["message"].as_str().unwrap_or("initialize failed").to_string(),
                ));
            }
        }
        let notification = JsonRpcRequest::notification("notifications/initialized", Some(json!({})));
        self.send_raw(&notification).await.map(|_| ())
    }

    pub async fn request(&self, id: RequestId, method: &str, params: Value) -> Result<JsonRpcResponse, McpSessionError> {
        let request = JsonRpcRequest::call(id.clone(), method, params);
        let raw = self
            .send_raw(&request)
            .await?
            .ok_or_else(|| McpSessionError::Transport("202 Accepted with no body".to_string()))?;
        Ok(JsonRpcResponse::from_wire(&raw, id))
    }

    /// POSTs `request`, returning the parsed body, or `None` for a 202-Accepted empty body
    /// (notifications).
    async fn send_raw(&self, request: &JsonRpcRequest) -> Result<Option<Value>, McpSessionError> {
        let body = serde_json::to_vec(request).map_err(|e| McpSessionError::Transport(e.to_string()))?;
        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .body(body);
        builder = self.headers.apply(builder);
        if let Some(sid) = self.session_id.lock().unwrap().clone() {
            builder = builder.header("MCP-Session-Id", sid);
        }
        let response = builder.send().await.map_err(|e| McpSessionError::Transport(e.to_string()))?;
        let status = response.status();
        if let Some(sid) = response.headers().get("MCP-Session-Id").and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().unwrap() = Some(sid.to_string());
        }
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpSessionError::Transport(format!("HTTP {status}: {text}")));
        }
        let content_type = response.headers().get("content-type").cloned();
        let text = response.text().await.map_err(|e| McpSessionError::Transport(e.to_string()))?;
        parse_json_rpc_from_body(&text, content_type.as_ref()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":{"ok":true}}"#;
        let value = parse_json_rpc_from_body(body, None).unwrap();
        assert_eq!(value["result"]["ok"], true);
    }

    #[test]
    fn parses_sse_framed_body() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"ok\":true}}\n\n";
        let content_type = reqwest::header::HeaderValue::from_static("text/event-stream");
        let value = parse_json_rpc_from_body(body, Some(&content_type)).unwrap();
        assert_eq!(value["result"]["ok"], true);
    }

    #[test]
    fn sse_body_with_no_terminal_frame_is_an_error() {
        let content_type = reqwest::header::HeaderValue::from_static("text/event-stream");
        let err = parse_json_rpc_from_body("data: {\"jsonrpc\":\"2.0\"}\n", Some(&content_type));
        assert!(err.is_err());
    }
}
