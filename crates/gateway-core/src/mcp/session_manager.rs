//! Owns `MCPSession`s: one long-lived singleton per bot's built-in container worker, plus
//! transient sessions for arbitrary stdio commands (§3 Lifecycles, §T2).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::contracts::ContainerService;
use crate::error::{ConnectionError, GatewayError, McpSessionError};
use crate::mcp::session::McpSession;
use crate::mcp::transport::spawn_stdio;

/// Path to the built-in worker binary inside every bot container (§6 Environment).
pub const BUILTIN_MCP_PATH: &str = "/app/mcp";

/// A transient session created for a user-supplied stdio command, tracked so it can be torn down
/// explicitly or swept when its process exits.
pub struct StdioSessionHandle {
    pub session_id: String,
    pub session: Arc<McpSession>,
}

/// Singleton registry of live `MCPSession`s, keyed by bot for the built-in worker and by a
/// generated id for ad-hoc stdio sessions (§3: "`SessionManager` exclusively owns `MCPSession`s").
pub struct SessionManager {
    containers: Arc<dyn ContainerService>,
    builtin: Mutex<HashMap<String, Arc<McpSession>>>,
    stdio: Mutex<HashMap<String, Arc<McpSession>>>,
}

impl SessionManager {
    pub fn new(containers: Arc<dyn ContainerService>) -> Self {
        Self {
            containers,
            builtin: Mutex::new(HashMap::new()),
            stdio: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the built-in session for `bot_id`, creating and exec'ing it on first use.
    pub async fn builtin_session(&self, bot_id: &str) -> Result<Arc<McpSession>, GatewayError> {
        let mut guard = self.builtin.lock().await;
        if let Some(existing) = guard.get(bot_id) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            guard.remove(bot_id);
        }
        let duplex = self.containers.exec_duplex(bot_id, BUILTIN_MCP_PATH).await?;
        let session = Arc::new(McpSession::from_transport(duplex));
        guard.insert(bot_id.to_string(), session.clone());
        tracing::info!(target: "mcp::session_manager", bot_id, "built-in session started");
        Ok(session)
    }

    /// Closes and forgets the built-in session for `bot_id`, if any (container teardown).
    pub async fn close_builtin(&self, bot_id: &str) {
        if let Some(session) = self.builtin.lock().await.remove(bot_id) {
            session.close(Some("container teardown".to_string())).await;
        }
    }

    /// Creates a transient stdio session by building a shell command string (env assignments,
    /// optional `cd`, then the quoted command+args) and execing it inside the bot's container
    /// (§4.7 "Stdio-over-container").
    pub async fn create_stdio_session(
        &self,
        bot_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<String, GatewayError> {
        let shell_command = build_shell_command(command, args, env, cwd);
        let duplex = self.containers.exec_duplex(bot_id, &shell_command).await?;
        let session = Arc::new(McpSession::from_transport(duplex));
        let session_id = Uuid::new_v4().to_string();
        self.stdio.lock().await.insert(session_id.clone(), session);
        Ok(session_id)
    }

    /// Spawns a stdio session on the host rather than inside a container (used by tests and by
    /// deployments with no container runtime configured).
    pub fn spawn_local_stdio_session(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<(McpSession, tokio::process::Child), McpSessionError> {
        let (duplex, child) = spawn_stdio(command, args, env, cwd)
            .map_err(|e| McpSessionError::Transport(e.to_string()))?;
        Ok((McpSession::from_transport(duplex), child))
    }

    pub async fn stdio_session(&self, session_id: &str) -> Result<Arc<McpSession>, GatewayError> {
        self.stdio
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ConnectionError::NotRunning(session_id.to_string()).into())
    }

    pub async fn close_stdio_session(&self, session_id: &str) {
        if let Some(session) = self.stdio.lock().await.remove(session_id) {
            session.close(Some("explicit close".to_string())).await;
        }
    }

    /// Sweeps sessions whose underlying process has already exited. Call periodically.
    pub async fn sweep_closed(&self) {
        self.builtin.lock().await.retain(|_, s| !s.is_closed());
        self.stdio.lock().await.retain(|_, s| !s.is_closed());
    }
}

fn build_shell_command(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    cwd: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    if let Some(dir) = cwd {
        parts.push(format!("cd {} &&", shell_quote(dir)));
    }
    for (k, v) in env {
        parts.push(format!("{}={}", k, shell_quote(v)));
    }
    parts.push(shell_quote(command));
    for arg in args {
        parts.push(shell_quote(arg));
    }
    parts.join(" ")
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_quotes_args_and_env() {
        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "a b".to_string());
        let cmd = build_shell_command("echo", &["hi there".to_string()], &env, Some("/data"));
        assert!(cmd.starts_with("cd '/data' &&"));
        assert!(cmd.contains("API_KEY='a b'"));
        assert!(cmd.ends_with("'echo' 'hi there'"));
    }
}
