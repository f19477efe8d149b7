//! `CardClient` implementation backing `StreamPatcher` for the enterprise-IM adapter (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use gateway_protocol::Attachment;
use reqwest::Client;
use serde_json::json;

use gateway_core::contracts::Blob;
use gateway_core::error::AdapterError;
use gateway_core::stream_patcher::CardClient;

use super::outbound::OutboundSender;
use super::EnterpriseImConfig;

pub struct EnterpriseImCardClient {
    client: Client,
    config: EnterpriseImConfig,
    bot_id: String,
    sender: OutboundSender,
}

impl EnterpriseImCardClient {
    pub fn new(config: EnterpriseImConfig, bot_id: String, blob: Arc<dyn Blob>) -> Self {
        let client = Client::new();
        Self { sender: OutboundSender::new(client.clone(), blob), client, config, bot_id }
    }
}

#[async_trait]
impl CardClient for EnterpriseImCardClient {
    async fn create_card(&self, target: &str, reply_to: Option<&str>, initial_text: &str) -> Result<String, AdapterError> {
        let card_content = json!({
            "config": {"wide_screen_mode": true},
            "elements": [{"tag": "div", "text": {"tag": "plain_text", "content": initial_text}}],
        });
        let url = match reply_to {
            Some(message_id) => format!("{}/im/v1/messages/{}/reply", self.config.base_url, message_id),
            None => format!("{}/im/v1/messages?receive_id_type=open_id", self.config.base_url),
        };
        let body = json!({
            "receive_id": target,
            "msg_type": "interactive",
            "content": card_content.to_string(),
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.tenant_access_token)
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        let status = response.status();
        let parsed: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "create_card".to_string(),
                message: parsed.to_string(),
                code: status.to_string(),
            });
        }
        parsed
            .get("data")
            .and_then(|d| d.get("message_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "create_card".to_string(),
                message: "response missing message_id".to_string(),
                code: "0".to_string(),
            })
    }

    async fn patch_card(&self, card_message_id: &str, text: &str) -> Result<(), AdapterError> {
        let card_content = json!({
            "config": {"wide_screen_mode": true},
            "elements": [{"tag": "div", "text": {"tag": "plain_text", "content": text}}],
        });
        let url = format!("{}/im/v1/messages/{}", self.config.base_url, card_message_id);
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.config.tenant_access_token)
            .json(&json!({"content": card_content.to_string()}))
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "patch_card".to_string(),
                message: body,
                code: status.to_string(),
            });
        }
        Ok(())
    }

    async fn deliver_attachment(&self, target: &str, attachment: &Attachment) -> Result<(), AdapterError> {
        let message = gateway_protocol::Message {
            attachments: vec![attachment.clone()],
            ..Default::default()
        };
        self.sender.send(&self.config, &self.bot_id, target, &message).await
    }
}
