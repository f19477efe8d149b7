//! Tool-worker session management: JSON-RPC wire types, duplex transport, the per-process
//! session state machine, and the session manager that owns them (§T1, §T2).

pub mod jsonrpc;
pub mod session;
pub mod session_manager;
pub mod transport;

pub use jsonrpc::{JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use session::{McpSession, PROTOCOL_VERSION};
pub use session_manager::SessionManager;
