//! MCPSession: one exec'd duplex byte stream framed as newline-delimited JSON-RPC, with the
//! `initialize` → `notifications/initialized` state machine and a correlated pending-call map
//! (§3 MCPSession, §4.6).
//!
//! Grounded on the teacher's blocking `loom::tool_source::mcp::session::McpSession`, rewritten as
//! fully async/tokio with a readloop task, `tokio::sync` primitives for the pending map, and an
//! explicit init-state machine (the teacher's version assumed a single synchronous caller).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::McpSessionError;
use crate::mcp::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::mcp::transport::DuplexBytes;

/// MCP protocol version negotiated on `initialize` (§4.6).
pub const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InitState {
    None,
    Initializing,
    Initialized,
    Ready,
}

struct PendingEntry {
    tx: oneshot::Sender<Result<JsonRpcResponse, McpSessionError>>,
}

struct Shared {
    pending: Mutex<HashMap<String, PendingEntry>>,
    init_state: Mutex<InitState>,
    /// Re-created each time a caller transitions `None`/`Initialized` -> `Initializing`, so
    /// concurrent waiters can observe the handshake's outcome without polling.
    init_wait: Mutex<Option<broadcast::Sender<()>>>,
    init_mutex: Mutex<()>,
    closed: CancellationToken,
    close_err: Mutex<Option<String>>,
    writer: Mutex<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
}

/// A long-lived JSON-RPC connection to one worker process (§3 MCPSession, glossary).
pub struct McpSession {
    shared: Arc<Shared>,
    readloop: tokio::task::JoinHandle<()>,
}

impl McpSession {
    /// Takes ownership of an already-spawned duplex transport and starts the readloop. Does not
    /// perform the handshake — call [`McpSession::ensure_initialized`] before the first real call,
    /// as `call()` does itself.
    pub fn from_transport(transport: Box<dyn DuplexBytes>) -> Self {
        let (reader, writer) = tokio::io::split(transport);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            init_state: Mutex::new(InitState::None),
            init_wait: Mutex::new(None),
            init_mutex: Mutex::new(()),
            closed: CancellationToken::new(),
            close_err: Mutex::new(None),
            writer: Mutex::new(Box::new(writer)),
        });

        let readloop_shared = shared.clone();
        let readloop = tokio::spawn(async move { read_loop(readloop_shared, reader).await });

        Self { shared, readloop }
    }

    /// Sends a request and awaits its matched response, honoring cancellation and session close
    /// (§4.6 `call()`). The id must be unique among calls currently pending on this session.
    pub async fn call(
        &self,
        id: RequestId,
        method: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, McpSessionError> {
        if method != "initialize" {
            self.ensure_initialized(cancel).await?;
        }
        let result = self.call_raw(id, method, params, cancel).await;
        if method == "initialize" {
            if let Ok(response) = &result {
                if response.error.is_none() {
                    *self.shared.init_state.lock().await = InitState::Initialized;
                }
            }
        } else if method == "notifications/initialized" && result.is_ok() {
            *self.shared.init_state.lock().await = InitState::Ready;
        }
        result
    }

    /// Sends a fire-and-forget notification (no id, no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpSessionError> {
        let notification = JsonRpcRequest::notification(method, params);
        self.write_frame(&notification).await?;
        if method == "notifications/initialized" {
            *self.shared.init_state.lock().await = InitState::Ready;
        }
        Ok(())
    }

    /// Drives the state machine in §4.6 to `Ready`, performing the handshake at most once per
    /// session even under concurrent callers.
    pub async fn ensure_initialized(&self, cancel: &CancellationToken) -> Result<(), McpSessionError> {
        loop {
            let state = *self.shared.init_state.lock().await;
            match state {
                InitState::Ready => return Ok(()),
                InitState::Initializing => {
                    let mut rx = {
                        let guard = self.shared.init_wait.lock().await;
                        match guard.as_ref() {
                            Some(tx) => tx.subscribe(),
                            None => continue,
                        }
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(McpSessionError::Cancelled),
                        _ = self.shared.closed.cancelled() => return Err(self.close_err_sync()),
                        _ = rx.recv() => continue,
                    }
                }
                InitState::Initialized => {
                    let _guard = self.shared.init_mutex.lock().await;
                    if *self.shared.init_state.lock().await != InitState::Initialized {
                        continue;
                    }
                    *self.shared.init_state.lock().await = InitState::Initializing;
                    let (tx, _rx) = broadcast::channel(1);
                    *self.shared.init_wait.lock().await = Some(tx.clone());
                    let outcome = self
                        .notify("notifications/initialized", Some(serde_json::json!({})))
                        .await;
                    *self.shared.init_wait.lock().await = None;
                    let _ = tx.send(());
                    match outcome {
                        Ok(()) => {
                            *self.shared.init_state.lock().await = InitState::Ready;
                            return Ok(());
                        }
                        Err(err) => {
                            *self.shared.init_state.lock().await = InitState::Initialized;
                            return Err(err);
                        }
                    }
                }
                InitState::None => {
                    let _guard = self.shared.init_mutex.lock().await;
                    if *self.shared.init_state.lock().await != InitState::None {
                        continue;
                    }
                    *self.shared.init_state.lock().await = InitState::Initializing;
                    let (tx, _rx) = broadcast::channel(1);
                    *self.shared.init_wait.lock().await = Some(tx.clone());

                    let handshake = self.handshake(cancel).await;
                    *self.shared.init_wait.lock().await = None;
                    let _ = tx.send(());

                    match handshake {
                        Ok(()) => {
                            *self.shared.init_state.lock().await = InitState::Ready;
                            return Ok(());
                        }
                        Err(err) => {
                            // §4.6: "A failed initialize attempt must be retriable ... the state
                            // returns to `None`".
                            *self.shared.init_state.lock().await = InitState::None;
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<(), McpSessionError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "gateway", "version": env!("CARGO_PKG_VERSION") },
        });
        let response = self
            .call_raw(RequestId::from("init"), "initialize", params, cancel)
            .await?;
        if let Some(err) = response.error {
            return Err(McpSessionError::Initialize(err.message));
        }
        self.notify("notifications/initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| McpSessionError::Initialize(e.to_string()))
    }

    /// Does not recurse into `ensure_initialized` — shared by `call()` and the handshake itself.
    async fn call_raw(
        &self,
        id: RequestId,
        method: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, McpSessionError> {
        let key = id.as_key();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(key.clone(), PendingEntry { tx });

        let request = JsonRpcRequest::call(id, method, params);
        if let Err(err) = self.write_frame(&request).await {
            self.shared.pending.lock().await.remove(&key);
            return Err(err);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.shared.pending.lock().await.remove(&key);
                Err(McpSessionError::Cancelled)
            }
            _ = self.shared.closed.cancelled() => {
                self.shared.pending.lock().await.remove(&key);
                Err(self.close_err_sync())
            }
            resp = rx => {
                self.shared.pending.lock().await.remove(&key);
                resp.unwrap_or_else(|_| Err(self.close_err_sync()))
            }
        }
    }

    async fn write_frame(&self, request: &JsonRpcRequest) -> Result<(), McpSessionError> {
        let mut line =
            serde_json::to_vec(request).map_err(|e| McpSessionError::Transport(e.to_string()))?;
        line.push(b'\n');
        let mut writer = self.shared.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| McpSessionError::Transport(e.to_string()))
    }

    fn close_err_sync(&self) -> McpSessionError {
        McpSessionError::Closed("session closed".to_string())
    }

    /// Idempotent: closes `closed`, fails all pending calls, aborts the readloop (§4.6 `close()`).
    pub async fn close(&self, reason: Option<String>) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        *self.shared.close_err.lock().await = reason.clone();
        self.shared.closed.cancel();
        self.readloop.abort();
        let mut pending = self.shared.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Err(McpSessionError::Closed(
                reason.clone().unwrap_or_else(|| "closed".to_string()),
            )));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.readloop.abort();
    }
}

/// §7: classifies a worker exit as benign (EOF/closed-pipe/cancelled, including any message
/// containing "canceled") vs. an error worth surfacing and logging. Decided in DESIGN.md.
pub fn is_benign_exit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("eof")
        || lower.contains("closed pipe")
        || lower.contains("broken pipe")
        || lower.contains("cancelled")
        || lower.contains("canceled")
}

async fn read_loop<R: tokio::io::AsyncRead + Send + Unpin + 'static>(shared: Arc<Shared>, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let next = lines.next_line().await;
        match next {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(raw) = serde_json::from_str::<serde_json::Value>(&line) else {
                    tracing::warn!(target: "mcp::session", "malformed frame, ignoring");
                    continue;
                };
                let Some(id_value) = raw.get("id") else {
                    continue; // a server-initiated notification; no correlation needed.
                };
                let Ok(id) = serde_json::from_value::<RequestId>(id_value.clone()) else {
                    continue;
                };
                let response = JsonRpcResponse::from_wire(&raw, id.clone());
                let mut pending = shared.pending.lock().await;
                if let Some(entry) = pending.remove(&id.as_key()) {
                    let _ = entry.tx.send(Ok(response));
                }
                // unmatched ids are ignored (§4.6 readloop).
            }
            Ok(None) => {
                finish(&shared, "eof".to_string()).await;
                break;
            }
            Err(err) => {
                finish(&shared, err.to_string()).await;
                break;
            }
        }
    }
}

async fn finish(shared: &Arc<Shared>, reason: String) {
    if shared.closed.is_cancelled() {
        return;
    }
    *shared.close_err.lock().await = Some(reason.clone());
    shared.closed.cancel();
    let mut pending = shared.pending.lock().await;
    for (_, entry) in pending.drain() {
        let _ = entry.tx.send(Err(McpSessionError::Closed(reason.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    fn fake_pair() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
        tokio::io::duplex(8192)
    }

    fn spawn_fake_server(
        server_side: tokio::io::DuplexStream,
        fail_initialize: bool,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server_side);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let req: serde_json::Value = serde_json::from_str(&line).unwrap();
                let method = req["method"].as_str().unwrap_or_default();
                if method == "notifications/initialized" {
                    continue; // notification, no response
                }
                let Some(id) = req.get("id").cloned() else { continue };
                let resp = if method == "initialize" && fail_initialize {
                    serde_json::json!({"jsonrpc":"2.0","id":id,"error":{"code":-1,"message":"nope"}})
                } else {
                    serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"ok":true,"method":method}})
                };
                let mut out = serde_json::to_vec(&resp).unwrap();
                out.push(b'\n');
                let _ = write_half.write_all(&out).await;
            }
        })
    }

    #[tokio::test]
    async fn initialize_then_tools_list_succeeds() {
        let (client_side, server_side) = fake_pair();
        let _server = spawn_fake_server(server_side, false);
        let session = McpSession::from_transport(Box::new(client_side));
        let cancel = CancellationToken::new();

        let resp = session
            .call(RequestId::from("1"), "tools/list", serde_json::json!({}), &cancel)
            .await
            .unwrap();
        assert!(!resp.is_error());
        assert_eq!(resp.result.unwrap()["method"], "tools/list");
    }

    #[tokio::test]
    async fn explicit_initialize_then_normal_call_sends_initialize_once() {
        let (client_side, server_side) = fake_pair();
        let init_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let server = {
            let init_count = init_count.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = tokio::io::split(server_side);
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let req: serde_json::Value = serde_json::from_str(&line).unwrap();
                    let method = req["method"].as_str().unwrap_or_default();
                    if method == "initialize" {
                        init_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    if method == "notifications/initialized" {
                        continue;
                    }
                    let Some(id) = req.get("id").cloned() else { continue };
                    let resp = serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"ok":true,"method":method}});
                    let mut out = serde_json::to_vec(&resp).unwrap();
                    out.push(b'\n');
                    let _ = write_half.write_all(&out).await;
                }
            })
        };
        let _server = server;

        let session = McpSession::from_transport(Box::new(client_side));
        let cancel = CancellationToken::new();

        let explicit = session
            .call(RequestId::from("init"), "initialize", serde_json::json!({}), &cancel)
            .await
            .unwrap();
        assert!(!explicit.is_error());
        assert_eq!(*session.shared.init_state.lock().await, InitState::Initialized);

        let normal = session
            .call(RequestId::from("1"), "tools/list", serde_json::json!({}), &cancel)
            .await
            .unwrap();
        assert!(!normal.is_error());
        assert_eq!(*session.shared.init_state.lock().await, InitState::Ready);
        assert_eq!(init_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_initialize_is_retriable() {
        let (client_side, server_side) = fake_pair();
        let _server = spawn_fake_server(server_side, true);
        let session = McpSession::from_transport(Box::new(client_side));
        let cancel = CancellationToken::new();

        let first = session.ensure_initialized(&cancel).await;
        assert!(first.is_err());
        let second = session.ensure_initialized(&cancel).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn call_removes_pending_entry_on_cancellation() {
        let (client_side, _server_side) = fake_pair();
        let session = McpSession::from_transport(Box::new(client_side));
        *session.shared.init_state.lock().await = InitState::Ready;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = session
            .call(RequestId::from("x"), "tools/call", serde_json::json!({}), &cancel)
            .await;
        assert!(matches!(result, Err(McpSessionError::Cancelled)));
        assert!(session.shared.pending.lock().await.is_empty());
    }

    #[test]
    fn benign_exit_classification() {
        assert!(is_benign_exit("context canceled"));
        assert!(is_benign_exit("operation was Cancelled"));
        assert!(is_benign_exit("EOF"));
        assert!(!is_benign_exit("permission denied"));
    }
}
