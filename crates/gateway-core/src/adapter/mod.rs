//! The per-platform `Adapter` contract (§4.1) and the registry that holds implementations by
//! `ChannelType` (§L1/§L2).

pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_protocol::{ChannelType, Identity, InboundMessage, OutboundMessage, StreamEvent};
use tokio_util::sync::CancellationToken;

use crate::contracts::{ChannelConfig, UserChannelBinding};
use crate::error::AdapterError;

pub use registry::AdapterRegistry;

/// Static shape of an adapter, returned once at registration time for introspection/validation.
#[derive(Clone, Debug, Default)]
pub struct AdapterDescriptor {
    pub capabilities: AdapterCapabilities,
    pub config_schema: Vec<String>,
    pub user_config_schema: Vec<String>,
    pub target_spec: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AdapterCapabilities {
    pub streaming: bool,
    pub reactions: bool,
    pub webhook: bool,
}

/// Handle to a running inbound connection, owned exclusively by the `ConnectionSupervisor` (§3).
#[async_trait]
pub trait Connection: Send + Sync {
    fn running(&self) -> bool;
    async fn stop(&self, cancel: &CancellationToken) -> Result<(), AdapterError>;
}

/// Invoked by `connect()` for each inbound event the platform delivers.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// A stateful outbound stream for the `Streaming` capability (§3, §9 "Coroutine-style streaming").
#[async_trait]
pub trait OutboundStream: Send + Sync {
    async fn push(&mut self, event: StreamEvent) -> Result<(), AdapterError>;
    async fn close(&mut self) -> Result<(), AdapterError>;
}

#[derive(Clone, Debug, Default)]
pub struct OpenStreamOptions {
    pub patch_interval_ms: u64,
}

/// Extra context passed to `processing_started` alongside the triggering inbound message.
#[derive(Clone, Debug, Default)]
pub struct ProcessingInfo {
    pub source_message_id: Option<String>,
}

/// Opaque token returned by `processing_started`, consumed by `completed`/`failed` (§3).
#[derive(Clone, Debug)]
pub struct ProcessingStatusHandle {
    pub token: String,
}

/// Byte payload for a resolved inbound attachment.
pub struct AttachmentPayload {
    pub reader: Box<dyn std::io::Read + Send>,
    pub mime: Option<String>,
}

/// Per-platform implementation of the channel contract (§4.1). Every method that talks to the
/// outside world is async and fallible; adapters never panic on remote failures.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn type_(&self) -> ChannelType;
    fn descriptor(&self) -> AdapterDescriptor;

    fn normalize_config(
        &self,
        raw: HashMap<String, String>,
    ) -> Result<HashMap<String, String>, AdapterError>;

    fn normalize_user_config(
        &self,
        raw: HashMap<String, String>,
    ) -> Result<HashMap<String, String>, AdapterError>;

    /// Maps a bare platform id to its tagged form; idempotent (§8 property 6).
    fn normalize_target(&self, raw: &str) -> String;

    fn resolve_target(&self, user_config: &UserChannelBinding) -> Result<String, AdapterError>;

    fn match_binding(&self, binding: &UserChannelBinding, criteria: &HashMap<String, String>) -> bool;

    fn build_user_config(&self, identity: &Identity) -> HashMap<String, String>;

    async fn discover_self(
        &self,
        credentials: &HashMap<String, String>,
    ) -> Result<(HashMap<String, String>, String), AdapterError>;

    async fn connect(
        &self,
        config: ChannelConfig,
        handler: InboundHandler,
    ) -> Result<Box<dyn Connection>, AdapterError>;

    async fn send(&self, config: &ChannelConfig, message: OutboundMessage) -> Result<(), AdapterError>;

    async fn open_stream(
        &self,
        config: &ChannelConfig,
        target: &str,
        opts: OpenStreamOptions,
    ) -> Result<Box<dyn OutboundStream>, AdapterError>;

    async fn processing_started(
        &self,
        config: &ChannelConfig,
        inbound: &InboundMessage,
        info: &ProcessingInfo,
    ) -> Result<Option<ProcessingStatusHandle>, AdapterError>;

    async fn processing_completed(
        &self,
        config: &ChannelConfig,
        handle: &ProcessingStatusHandle,
    ) -> Result<(), AdapterError>;

    async fn processing_failed(
        &self,
        config: &ChannelConfig,
        handle: &ProcessingStatusHandle,
    ) -> Result<(), AdapterError>;

    async fn react(
        &self,
        config: &ChannelConfig,
        target: &str,
        message_id: &str,
        emoji_or_token: &str,
    ) -> Result<(), AdapterError>;

    async fn unreact(
        &self,
        config: &ChannelConfig,
        target: &str,
        message_id: &str,
        emoji_or_token: &str,
    ) -> Result<(), AdapterError>;

    async fn resolve_attachment(
        &self,
        config: &ChannelConfig,
        attachment: &gateway_protocol::Attachment,
    ) -> Result<AttachmentPayload, AdapterError>;

    /// Decodes one webhook callback body into an `InboundMessage` (§4.5). Adapters without a
    /// webhook capability inherit the default of "nothing to decode".
    fn decode_webhook_event(
        &self,
        _bot_id: &str,
        _self_identity: &HashMap<String, String>,
        _body: &serde_json::Value,
    ) -> Result<Option<InboundMessage>, AdapterError> {
        Ok(None)
    }
}
