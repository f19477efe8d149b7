//! External collaborator contracts the gateway depends on but does not implement (§1 "explicitly
//! out of scope"): persistence, container orchestration, blob storage, the LLM chat engine, and
//! request authorization. Each is a trait so the gateway can be exercised against fakes in tests.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;
use gateway_protocol::{ChannelType, StreamEvent};
use tokio_stream::Stream;

use crate::error::GatewayError;

/// Persisted binding of `(bot_id, channel_type)` to credentials/identity/routing (§3).
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub bot_id: String,
    pub channel_type: ChannelType,
    pub credentials: HashMap<String, String>,
    pub external_identity: Option<String>,
    pub self_identity: HashMap<String, String>,
    pub routing: HashMap<String, String>,
    pub capabilities: HashMap<String, bool>,
    pub disabled: bool,
}

/// Mapping from a user to a platform-specific delivery target (§3), unique by `(user_id, channel_type)`.
#[derive(Clone, Debug)]
pub struct UserChannelBinding {
    pub user_id: String,
    pub channel_type: ChannelType,
    pub attributes: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
    Error,
}

/// Per-bot sandboxed container record (§3).
#[derive(Clone, Debug)]
pub struct Container {
    pub bot_id: String,
    pub container_id: String,
    pub image: String,
    pub status: ContainerStatus,
    pub namespace: String,
    pub host_path: String,
    pub container_path: String,
    pub auto_start: bool,
}

/// A blob's metadata, returned alongside its byte reader by [`Blob::open`].
#[derive(Clone, Debug)]
pub struct Asset {
    pub content_hash: String,
    pub mime: Option<String>,
    pub size: u64,
}

/// Read/write access to persisted bots, channel configs, containers, and identities (§1).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_channel_config(
        &self,
        bot_id: &str,
        channel_type: &ChannelType,
    ) -> Result<Option<ChannelConfig>, GatewayError>;
    async fn list_channel_configs(&self, bot_id: &str) -> Result<Vec<ChannelConfig>, GatewayError>;
    async fn upsert_channel_config(&self, config: ChannelConfig) -> Result<ChannelConfig, GatewayError>;
    async fn delete_channel_config(
        &self,
        bot_id: &str,
        channel_type: &ChannelType,
    ) -> Result<(), GatewayError>;
    async fn get_user_binding(
        &self,
        user_id: &str,
        channel_type: &ChannelType,
    ) -> Result<Option<UserChannelBinding>, GatewayError>;
    async fn get_container(&self, bot_id: &str) -> Result<Option<Container>, GatewayError>;
}

/// Container lifecycle and exec contract (§1).
#[async_trait]
pub trait ContainerService: Send + Sync {
    async fn ensure_running(&self, bot_id: &str) -> Result<Container, GatewayError>;
    async fn stop(&self, bot_id: &str) -> Result<(), GatewayError>;
    async fn delete(&self, bot_id: &str) -> Result<(), GatewayError>;
    /// Execs `command` inside the bot's container, returning a duplex byte stream (stdin/stdout
    /// of the spawned process) an [`crate::mcp::session::McpSession`] can frame JSON-RPC over.
    async fn exec_duplex(
        &self,
        bot_id: &str,
        command: &str,
    ) -> Result<Box<dyn crate::mcp::transport::DuplexBytes>, GatewayError>;
}

/// Media/asset blob store (§1): `open(bot_id, content_hash) -> reader + Asset`.
#[async_trait]
pub trait Blob: Send + Sync {
    async fn open(
        &self,
        bot_id: &str,
        content_hash: &str,
    ) -> Result<(Box<dyn Read + Send>, Asset), GatewayError>;
}

/// The LLM chat engine, modeled only by the event stream it produces (§1).
#[async_trait]
pub trait FlowRunner: Send + Sync {
    async fn run(
        &self,
        inbound: gateway_protocol::InboundMessage,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError>;
}

/// Bearer-credential authorization contract (§1): yields a channel-identity id, or rejects.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, bearer_token: &str) -> Result<String, GatewayError>;
}
