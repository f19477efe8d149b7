//! Channel Subsystem, Tool-Worker Session Manager, and MCP Federation Gateway (§2 System Overview).
//!
//! This crate holds the platform-independent core: the `Adapter` contract and registry, the
//! connection supervisor and inbound dispatcher, the stream patcher, the MCP session state
//! machine and session manager, and the federation router. `gateway-adapters` provides concrete
//! `Adapter` implementations; `gateway-http` exposes all of this over HTTP.

pub mod adapter;
pub mod channel_manager;
pub mod connection;
pub mod contracts;
pub mod dedup;
pub mod error;
pub mod federation;
pub mod mcp;
pub mod processing_status;
pub mod stream_patcher;

pub use adapter::{Adapter, AdapterRegistry};
pub use channel_manager::ChannelManager;
pub use connection::ConnectionSupervisor;
pub use error::GatewayError;
pub use federation::FederationRouter;
pub use mcp::{McpSession, SessionManager};
