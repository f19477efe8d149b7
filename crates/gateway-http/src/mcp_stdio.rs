//! `/bots/:id/mcp-stdio[/:session_id]`: create and proxy ad-hoc stdio MCP sessions (§6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gateway_core::mcp::jsonrpc::{JsonRpcResponse, RequestId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateStdioSessionRequest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

#[derive(Serialize)]
pub struct CreateStdioSessionResponse {
    pub session_id: String,
    pub url: String,
    pub tools: serde_json::Value,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    Json(body): Json<CreateStdioSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = state
        .session_manager
        .create_stdio_session(&bot_id, &body.command, &body.args, &body.env, body.cwd.as_deref())
        .await?;

    let session = state.session_manager.stdio_session(&session_id).await?;
    let cancel = CancellationToken::new();
    let tools = session
        .call(RequestId::from("tools/list"), "tools/list", serde_json::json!({}), &cancel)
        .await
        .map(|resp| resp.result.unwrap_or(serde_json::Value::Null))
        .unwrap_or(serde_json::Value::Null);

    Ok(Json(CreateStdioSessionResponse {
        url: format!("/bots/{bot_id}/mcp-stdio/{session_id}"),
        session_id,
        tools,
    }))
}

pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Path((_bot_id, session_id)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session_manager.stdio_session(&session_id).await?;
    let method = body.get("method").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let params = body.get("params").cloned().unwrap_or(serde_json::Value::Null);
    let raw_id = body.get("id").cloned();

    if raw_id.is_none() {
        let _ = session.notify(&method, Some(params)).await;
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let id = match raw_id.and_then(|v| serde_json::from_value::<RequestId>(v).ok()) {
        Some(id) => id,
        None => return Ok((StatusCode::BAD_REQUEST, "missing or malformed id").into_response()),
    };

    let cancel = CancellationToken::new();
    let response = match session.call(id.clone(), &method, params, &cancel).await {
        Ok(resp) => resp,
        Err(err) => JsonRpcResponse::failure(
            id,
            gateway_core::mcp::jsonrpc::JsonRpcErrorObject { code: -32000, message: err.to_string(), data: None },
        ),
    };

    Ok(Json(response).into_response())
}
