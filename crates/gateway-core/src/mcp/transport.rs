//! Duplex byte transport for an exec'd in-container process, and the newline-delimited JSON-RPC
//! framing over it (§4.6: "one object per line over the process's stdin/stdout").

use tokio::io::{AsyncRead, AsyncWrite};

/// A process's duplex stdio, as handed to [`McpSession`](crate::mcp::session::McpSession) by the
/// [`ContainerService`](crate::contracts::ContainerService) or a local `Command` spawn. Object-safe
/// so the container service can return it without the gateway depending on its concrete process type.
pub trait DuplexBytes: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexBytes for T {}

/// Spawns a local child process for stdio MCP (used when no container exec is involved, e.g. the
/// `mcp-stdio` endpoint's user-supplied commands run directly on the host during tests, or inside
/// the container via the shell-command wrapping described in §4.7).
pub fn spawn_stdio(
    command: &str,
    args: &[String],
    env: &std::collections::HashMap<String, String>,
    cwd: Option<&str>,
) -> std::io::Result<(Box<dyn DuplexBytes>, tokio::process::Child)> {
    let mut cmd = tokio::process::Command::new(command);
    cmd.args(args)
        .envs(env)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    if let Some(stderr) = child.stderr.take() {
        drain_stderr(stderr);
    }
    let duplex: Box<dyn DuplexBytes> = Box::new(tokio::io::join(stdout, stdin));
    Ok((duplex, child))
}

/// Drains a child's stderr into the structured log; a closed stderr is not an error (§4.6).
fn drain_stderr(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(target: "mcp::stderr", %line),
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(target: "mcp::stderr", %err, "stderr read ended");
                    break;
                }
            }
        }
    });
}
