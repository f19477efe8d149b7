//! `POST /bots/:id/tools`: streamable-HTTP JSON-RPC shim in front of the federation router (§4.8).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use gateway_core::mcp::jsonrpc::{JsonRpcErrorObject, JsonRpcResponse, RequestId};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Per-request session context carried from headers; read but not required (§4.8).
#[derive(Debug, Default)]
struct RequestContext {
    chat_id: Option<String>,
    identity: Option<String>,
    reply_target: Option<String>,
    platform: Option<String>,
    display_name: Option<String>,
}

impl RequestContext {
    fn from_headers(headers: &HeaderMap) -> Self {
        let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        Self {
            chat_id: header_str("x-chat-id"),
            identity: header_str("x-identity"),
            reply_target: header_str("x-reply-target"),
            platform: header_str("x-platform"),
            display_name: header_str("x-display-name"),
        }
    }
}

/// Ensures both `application/json` and `text/event-stream` are present in an `Accept` header
/// value, preserving whatever the client already sent (§4.8).
fn normalize_accept_header(existing: Option<&str>) -> String {
    let mut values: Vec<String> = existing
        .unwrap_or_default()
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    for required in ["application/json", "text/event-stream"] {
        if !values.iter().any(|v| v == required) {
            values.push(required.to_string());
        }
    }
    values.join(", ")
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let accept = normalize_accept_header(headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()));
    let _context = RequestContext::from_headers(&headers);

    let method = body.get("method").and_then(|v| v.as_str()).unwrap_or_default();
    let raw_id = body.get("id").cloned();
    let is_notification = raw_id.is_none();

    if is_notification {
        tracing::debug!(target: "tool_gateway", bot_id, method, "notification accepted, no response body");
        return with_accept(StatusCode::ACCEPTED.into_response(), &accept);
    }

    let id = match raw_id.and_then(|v| serde_json::from_value::<RequestId>(v).ok()) {
        Some(id) => id,
        None => return with_accept((StatusCode::BAD_REQUEST, "missing or malformed id").into_response(), &accept),
    };

    let cancel = CancellationToken::new();
    let params = body.get("params").cloned().unwrap_or(serde_json::Value::Null);

    let response = match method {
        "tools/list" => {
            let tools = state.federation.list_tools(&bot_id, &cancel).await;
            let descriptors: Vec<serde_json::Value> = tools
                .into_iter()
                .map(|t| {
                    let mut descriptor = t.descriptor;
                    if let Some(obj) = descriptor.as_object_mut() {
                        obj.insert("name".to_string(), serde_json::Value::String(t.name));
                    }
                    descriptor
                })
                .collect();
            JsonRpcResponse::success(id, serde_json::json!({"tools": descriptors}))
        }
        "tools/call" => {
            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let arguments = params.get("arguments").cloned().unwrap_or(serde_json::json!({}));
            match state.federation.call_tool(&bot_id, &name, arguments, &cancel).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(err) => JsonRpcResponse::failure(
                    id,
                    JsonRpcErrorObject { code: -32000, message: err.to_string(), data: None },
                ),
            }
        }
        other => JsonRpcResponse::failure(
            id,
            JsonRpcErrorObject { code: -32601, message: format!("method not found: {other}"), data: None },
        ),
    };

    with_accept(Json(response).into_response(), &accept)
}

/// Echoes the normalized `Accept` value back on the response so a client that sent only one of
/// the two required media types can see what the gateway actually negotiated (§4.8).
fn with_accept(mut response: axum::response::Response, accept: &str) -> axum::response::Response {
    if let Ok(value) = axum::http::HeaderValue::from_str(accept) {
        response.headers_mut().insert(axum::http::header::ACCEPT, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accept_adds_both_when_absent() {
        let normalized = normalize_accept_header(None);
        assert!(normalized.contains("application/json"));
        assert!(normalized.contains("text/event-stream"));
    }

    #[test]
    fn normalize_accept_preserves_existing_value() {
        let normalized = normalize_accept_header(Some("application/json"));
        assert_eq!(normalized.matches("application/json").count(), 1);
        assert!(normalized.contains("text/event-stream"));
    }

    #[test]
    fn with_accept_sets_response_header_to_normalized_value() {
        let accept = normalize_accept_header(Some("application/json"));
        let response = with_accept(StatusCode::ACCEPTED.into_response(), &accept);
        let header = response.headers().get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap();
        assert!(header.contains("text/event-stream"));
    }
}
