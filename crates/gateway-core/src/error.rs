//! Per-module error taxonomies plus the crate-root aggregate used at the HTTP boundary (§7, §2.1).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("validation failed for field `{field}`: {reason}")]
    Validation { field: String, reason: String },
    #[error("{platform} {op} failed: {message} (code: {code})")]
    Platform { platform: String, op: String, message: String, code: String },
    #[error("unsupported operation `{0}` for this adapter")]
    Unsupported(String),
    #[error("attachment is not resolvable: no platform_key, content_hash, base64, or url set")]
    UnresolvableAttachment,
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum McpSessionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("initialize handshake failed: {0}")]
    Initialize(String),
    #[error("session closed: {0}")]
    Closed(String),
    #[error("call cancelled")]
    Cancelled,
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },
}

#[derive(Error, Debug)]
pub enum FederationError {
    #[error("unknown tool source prefix in `{0}`")]
    UnknownSource(String),
    #[error("no reachable endpoint for source `{0}`")]
    NoReachableEndpoint(String),
    #[error("source `{source}` error: {inner}")]
    Source { source: String, inner: McpSessionError },
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection for config `{0}` is not running")]
    NotRunning(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Aggregate error used at the HTTP boundary; each module's error converts into this, and
/// `gateway-http` maps it to a status code per §7's taxonomy.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    McpSession(#[from] McpSessionError),
    #[error(transparent)]
    Federation(#[from] FederationError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("auth: {0}")]
    Auth(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl GatewayError {
    /// §7 taxonomy → HTTP status code. Kept independent of any particular HTTP framework so this
    /// crate doesn't need to depend on `axum` just to classify errors.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Adapter(AdapterError::Validation { .. }) => 400,
            GatewayError::Adapter(_) => 502,
            GatewayError::McpSession(McpSessionError::Timeout(_)) => 504,
            GatewayError::McpSession(McpSessionError::Cancelled) => 499,
            GatewayError::McpSession(_) => 502,
            GatewayError::Federation(_) => 502,
            GatewayError::Connection(_) => 409,
            GatewayError::NotFound(_) => 404,
            GatewayError::Auth(_) => 401,
            GatewayError::Fatal(_) => 500,
        }
    }
}
