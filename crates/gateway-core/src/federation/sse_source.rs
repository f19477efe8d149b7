//! Remote SSE MCP source: resolves a working SSE endpoint from a user config's several possible
//! shapes, then delegates request/response framing to the same dual JSON/SSE body parser the
//! HTTP source uses (§4.7 source S, §F3 `SSEEndpointResolver`).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::McpSessionError;
use crate::federation::header_injector::HeaderInjector;
use crate::federation::http_source::HttpMcpSource;
use crate::mcp::jsonrpc::{JsonRpcResponse, RequestId};

/// Produces SSE endpoint candidates from a user config map, in the order §4.7 specifies:
/// explicit `sse_url`/`sseUrl`, then `url`, then — if `message_url`'s suffix is `/message` — its
/// `/sse` sibling, then the raw `message_url`, then a `/sse` sibling derived from a `url` ending
/// in `/message`.
pub fn resolve_candidates(config: &HashMap<String, String>) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(v) = config.get("sse_url").or_else(|| config.get("sseUrl")) {
        candidates.push(v.clone());
    }
    if let Some(v) = config.get("url") {
        candidates.push(v.clone());
    }
    if let Some(message_url) = config.get("message_url") {
        if let Some(sibling) = message_sibling(message_url) {
            candidates.push(sibling);
        }
        candidates.push(message_url.clone());
    }
    if let Some(url) = config.get("url") {
        if let Some(sibling) = message_sibling(url) {
            candidates.push(sibling);
        }
    }

    candidates
}

fn message_sibling(url: &str) -> Option<String> {
    url.strip_suffix("/message").map(|base| format!("{base}/sse"))
}

/// An SSE-transport MCP source: resolves the first reachable candidate endpoint, then behaves
/// like an [`HttpMcpSource`] against it.
pub struct SseMcpSource {
    inner: HttpMcpSource,
    pub resolved_url: String,
}

impl SseMcpSource {
    pub async fn connect(
        config: &HashMap<String, String>,
        headers: HeaderInjector,
    ) -> Result<Self, McpSessionError> {
        let candidates = resolve_candidates(config);
        if candidates.is_empty() {
            return Err(McpSessionError::Transport(
                "no SSE endpoint candidates in config".to_string(),
            ));
        }
        let mut last_err = None;
        for candidate in candidates {
            match HttpMcpSource::connect(candidate.clone(), headers.clone()).await {
                Ok(inner) => return Ok(Self { inner, resolved_url: candidate }),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| McpSessionError::Transport("no reachable SSE endpoint".to_string())))
    }

    pub async fn request(&self, id: RequestId, method: &str, params: Value) -> Result<JsonRpcResponse, McpSessionError> {
        self.inner.request(id, method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn explicit_sse_url_wins_over_everything() {
        let config = cfg(&[("sse_url", "https://a/sse"), ("url", "https://b/mcp")]);
        assert_eq!(resolve_candidates(&config)[0], "https://a/sse");
    }

    #[test]
    fn message_url_with_message_suffix_prefers_sse_sibling() {
        let config = cfg(&[("message_url", "https://a/message")]);
        let candidates = resolve_candidates(&config);
        assert_eq!(candidates[0], "https://a/sse");
        assert_eq!(candidates[1], "https://a/message");
    }

    #[test]
    fn url_ending_in_message_derives_sse_sibling_last() {
        let config = cfg(&[("url", "https://a/message")]);
        let candidates = resolve_candidates(&config);
        assert_eq!(candidates, vec!["https://a/message".to_string(), "https://a/sse".to_string()]);
    }

    #[test]
    fn no_candidates_when_config_is_empty() {
        assert!(resolve_candidates(&HashMap::new()).is_empty());
    }
}
