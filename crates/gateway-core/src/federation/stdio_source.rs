//! User-defined "stdio" tool source: a command run inside the bot's container via
//! `SessionManager::create_stdio_session`, then driven like any other `MCPSession` (§4.7
//! "Stdio-over-container").

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::mcp::jsonrpc::{JsonRpcResponse, RequestId};
use crate::mcp::session::McpSession;
use crate::mcp::session_manager::SessionManager;

/// One named stdio tool source for a bot, created on demand by `POST /bots/:id/mcp-stdio`.
pub struct StdioSource {
    pub name: String,
    session: Arc<McpSession>,
}

impl StdioSource {
    pub async fn create(
        manager: &SessionManager,
        bot_id: &str,
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<(String, Self), GatewayError> {
        let session_id = manager.create_stdio_session(bot_id, command, args, env, cwd).await?;
        let session = manager.stdio_session(&session_id).await?;
        Ok((session_id, Self { name: name.to_string(), session }))
    }

    pub async fn list_tools(&self, cancel: &CancellationToken) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .session
            .call(RequestId::from("tools/list"), "tools/list", serde_json::json!({}), cancel)
            .await?;
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    pub async fn call_tool(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let params = serde_json::json!({"name": tool_name, "arguments": args});
        Ok(self
            .session
            .call(RequestId::from(uuid::Uuid::new_v4().to_string()), "tools/call", params, cancel)
            .await?)
    }
}
