//! Merges tool sources behind one `tools/list`/`tools/call` surface, disambiguating by a
//! source-type prefix (§4.7 `FederationRouter`, §F2).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{FederationError, GatewayError};
use crate::federation::http_source::HttpMcpSource;
use crate::federation::sse_source::SseMcpSource;
use crate::federation::stdio_source::StdioSource;
use crate::mcp::jsonrpc::RequestId;
use crate::mcp::session_manager::SessionManager;

/// One tool, as exposed to the federated `tools/list` caller: a prefixed name plus the source's
/// own tool descriptor payload.
#[derive(Clone, Debug)]
pub struct FederatedTool {
    pub name: String,
    pub descriptor: Value,
}

/// Composes the built-in in-container MCP (B) with registered remote HTTP (H), SSE (S), and
/// user-defined stdio (X) sources for one bot.
pub struct FederationRouter {
    session_manager: Arc<SessionManager>,
    http_sources: RwLock<HashMap<String, Arc<HttpMcpSource>>>,
    sse_sources: RwLock<HashMap<String, Arc<SseMcpSource>>>,
    stdio_sources: RwLock<HashMap<String, Arc<StdioSource>>>,
}

impl FederationRouter {
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        Self {
            session_manager,
            http_sources: RwLock::new(HashMap::new()),
            sse_sources: RwLock::new(HashMap::new()),
            stdio_sources: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_http_source(&self, name: String, source: HttpMcpSource) {
        self.http_sources.write().await.insert(name, Arc::new(source));
    }

    pub async fn register_sse_source(&self, name: String, source: SseMcpSource) {
        self.sse_sources.write().await.insert(name, Arc::new(source));
    }

    pub async fn register_stdio_source(&self, name: String, source: StdioSource) {
        self.stdio_sources.write().await.insert(name, Arc::new(source));
    }

    /// Concurrently queries every federated source for `bot_id` and returns the merged,
    /// prefix-disambiguated tool list. A single source's failure is logged and elided, never
    /// fatal to the overall call (§4.7).
    pub async fn list_tools(&self, bot_id: &str, cancel: &CancellationToken) -> Vec<FederatedTool> {
        let mut tools = Vec::new();

        match self.session_manager.builtin_session(bot_id).await {
            Ok(session) => match session
                .call(RequestId::from("tools/list"), "tools/list", serde_json::json!({}), cancel)
                .await
            {
                Ok(response) => tools.extend(prefixed_tools("b:", "", &response.result)),
                Err(err) => tracing::warn!(target: "federation", bot_id, %err, "builtin tools/list failed"),
            },
            Err(err) => tracing::warn!(target: "federation", bot_id, %err, "no builtin container"),
        }

        for (name, source) in self.http_sources.read().await.iter() {
            match source.request(RequestId::from("tools/list"), "tools/list", serde_json::json!({})).await {
                Ok(response) => tools.extend(prefixed_tools("h:", name, &response.result)),
                Err(err) => tracing::warn!(target: "federation", source = %name, %err, "http tools/list failed"),
            }
        }

        for (name, source) in self.sse_sources.read().await.iter() {
            match source.request(RequestId::from("tools/list"), "tools/list", serde_json::json!({})).await {
                Ok(response) => tools.extend(prefixed_tools("s:", name, &response.result)),
                Err(err) => tracing::warn!(target: "federation", source = %name, %err, "sse tools/list failed"),
            }
        }

        for (name, source) in self.stdio_sources.read().await.iter() {
            match source.list_tools(cancel).await {
                Ok(result) => tools.extend(prefixed_tools("x:", name, &Some(result))),
                Err(err) => tracing::warn!(target: "federation", source = %name, %err, "stdio tools/list failed"),
            }
        }

        tools
    }

    /// Parses the source prefix off `name` and forwards to the matching executor with the
    /// source's native (unprefixed) tool name (§4.7).
    pub async fn call_tool(
        &self,
        bot_id: &str,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        let (prefix, rest) = name.split_once(':').ok_or_else(|| FederationError::UnknownSource(name.to_string()))?;
        match prefix {
            "b" => {
                let session = self.session_manager.builtin_session(bot_id).await?;
                let params = serde_json::json!({"name": rest, "arguments": args});
                let response = session
                    .call(RequestId::from(uuid::Uuid::new_v4().to_string()), "tools/call", params, cancel)
                    .await
                    .map_err(|e| FederationError::Source { source: "b".to_string(), inner: e })?;
                Ok(response.result.unwrap_or(Value::Null))
            }
            "h" => {
                let (source_name, tool_name) = rest.split_once(':').ok_or_else(|| FederationError::UnknownSource(name.to_string()))?;
                let sources = self.http_sources.read().await;
                let source = sources.get(source_name).ok_or_else(|| FederationError::NoReachableEndpoint(source_name.to_string()))?;
                let params = serde_json::json!({"name": tool_name, "arguments": args});
                let response = source
                    .request(RequestId::from(uuid::Uuid::new_v4().to_string()), "tools/call", params)
                    .await
                    .map_err(|e| FederationError::Source { source: source_name.to_string(), inner: e })?;
                Ok(response.result.unwrap_or(Value::Null))
            }
            "s" => {
                let (source_name, tool_name) = rest.split_once(':').ok_or_else(|| FederationError::UnknownSource(name.to_string()))?;
                let sources = self.sse_sources.read().await;
                let source = sources.get(source_name).ok_or_else(|| FederationError::NoReachableEndpoint(source_name.to_string()))?;
                let params = serde_json::json!({"name": tool_name, "arguments": args});
                let response = source
                    .request(RequestId::from(uuid::Uuid::new_v4().to_string()), "tools/call", params)
                    .await
                    .map_err(|e| FederationError::Source { source: source_name.to_string(), inner: e })?;
                Ok(response.result.unwrap_or(Value::Null))
            }
            "x" => {
                let (source_name, tool_name) = rest.split_once(':').ok_or_else(|| FederationError::UnknownSource(name.to_string()))?;
                let sources = self.stdio_sources.read().await;
                let source = sources.get(source_name).ok_or_else(|| FederationError::NoReachableEndpoint(source_name.to_string()))?;
                let response = source
                    .call_tool(tool_name, args, cancel)
                    .await
                    .map_err(|e| match e {
                        GatewayError::McpSession(inner) => FederationError::Source { source: source_name.to_string(), inner },
                        other => return_as_federation(other, source_name),
                    })?;
                Ok(response.result.unwrap_or(Value::Null))
            }
            _ => Err(FederationError::UnknownSource(name.to_string()).into()),
        }
    }
}

fn return_as_federation(err: GatewayError, source_name: &str) -> FederationError {
    FederationError::Source {
        source: source_name.to_string(),
        inner: crate::error::McpSessionError::Transport(err.to_string()),
    }
}

fn prefixed_tools(prefix: &str, source_name: &str, result: &Option<Value>) -> Vec<FederatedTool> {
    let Some(result) = result else { return Vec::new() };
    let Some(list) = result.get("tools").and_then(|v| v.as_array()) else { return Vec::new() };
    list.iter()
        .filter_map(|tool| {
            let native_name = tool.get("name")?.as_str()?;
            let prefixed = if source_name.is_empty() {
                format!("{prefix}{native_name}")
            } else {
                format!("{prefix}{source_name}:{native_name}")
            };
            Some(FederatedTool { name: prefixed, descriptor: tool.clone() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_tools_for_builtin_has_no_source_segment() {
        let result = Some(serde_json::json!({"tools": [{"name": "search"}]}));
        let tools = prefixed_tools("b:", "", &result);
        assert_eq!(tools[0].name, "b:search");
    }

    #[test]
    fn prefixed_tools_for_named_source_includes_name() {
        let result = Some(serde_json::json!({"tools": [{"name": "search"}]}));
        let tools = prefixed_tools("h:", "exa", &result);
        assert_eq!(tools[0].name, "h:exa:search");
    }
}
