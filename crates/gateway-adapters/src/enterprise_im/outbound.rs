//! Non-streaming delivery: attachment upload, rich-post assembly, and reply handling (§4.3).

use std::io::Read as _;
use std::sync::Arc;

use gateway_protocol::{Message, MessagePart};
use reqwest::multipart;
use reqwest::Client;
use serde_json::{json, Value};

use gateway_core::contracts::Blob;
use gateway_core::error::AdapterError;

use super::EnterpriseImConfig;

pub struct OutboundSender {
    client: Client,
    blob: Arc<dyn Blob>,
}

impl OutboundSender {
    pub fn new(client: Client, blob: Arc<dyn Blob>) -> Self {
        Self { client, blob }
    }

    /// §4.3 non-streaming send: attachments first (if any), else a rich post for multi-part
    /// messages, else plain text; a `reply` routes through the reply API instead of create.
    pub async fn send(&self, config: &EnterpriseImConfig, bot_id: &str, target: &str, message: &Message) -> Result<(), AdapterError> {
        if !message.attachments.is_empty() {
            for attachment in &message.attachments {
                self.send_attachment(config, bot_id, target, attachment, message.reply.as_ref()).await?;
            }
            return Ok(());
        }

        if message.parts.len() > 1 {
            let payload = build_rich_post(&message.parts);
            return self.post_message(config, target, "post", payload, message.reply.as_ref()).await;
        }

        let text = message.text.trim();
        if text.is_empty() {
            return Err(AdapterError::Validation { field: "text".to_string(), reason: "empty text message".to_string() });
        }
        self.post_message(config, target, "text", json!({"text": text}), message.reply.as_ref()).await
    }

    async fn send_attachment(
        &self,
        config: &EnterpriseImConfig,
        bot_id: &str,
        target: &str,
        attachment: &gateway_protocol::Attachment,
        reply: Option<&gateway_protocol::ReplyRef>,
    ) -> Result<(), AdapterError> {
        let is_image = matches!(attachment.kind, Some(gateway_protocol::AttachmentKind::Image));
        let (msg_type, key_field) = if is_image { ("image", "image_key") } else { ("file", "file_key") };

        let key = if let Some(existing) = &attachment.platform_key {
            existing.clone()
        } else {
            let bytes = self.attachment_bytes(bot_id, attachment).await?;
            self.upload_attachment(config, attachment, is_image, bytes).await?
        };

        self.post_message(config, target, msg_type, json!({ key_field: key }), reply).await
    }

    /// Resolves the attachment's bytes in reference-precedence order: an already-fetched
    /// `content_hash` asset from the blob store, then an inline `base64` body, then a fetch of
    /// `url` (§3 Attachment invariant lists all three as valid references).
    async fn attachment_bytes(&self, bot_id: &str, attachment: &gateway_protocol::Attachment) -> Result<Vec<u8>, AdapterError> {
        if let Some(content_hash) = &attachment.content_hash {
            let (mut reader, _asset) = self.blob.open(bot_id, content_hash).await.map_err(|e| AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "blob_open".to_string(),
                message: e.to_string(),
                code: "0".to_string(),
            })?;
            return tokio::task::spawn_blocking(move || {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map(|_| buf)
            })
            .await
            .map_err(|e| AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "blob_read".to_string(),
                message: e.to_string(),
                code: "0".to_string(),
            })?
            .map_err(|e| AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "blob_read".to_string(),
                message: e.to_string(),
                code: "0".to_string(),
            });
        }

        if let Some(encoded) = &attachment.base64 {
            use base64::Engine as _;
            return base64::engine::general_purpose::STANDARD.decode(encoded).map_err(|e| AdapterError::Validation {
                field: "base64".to_string(),
                reason: e.to_string(),
            });
        }

        if let Some(url) = &attachment.url {
            let response = self.client.get(url).send().await.map_err(AdapterError::Transport)?;
            let bytes = response.bytes().await.map_err(AdapterError::Transport)?;
            return Ok(bytes.to_vec());
        }

        Err(AdapterError::UnresolvableAttachment)
    }

    /// Uploads to the image/file upload API (§4.3) and returns the platform key the message body
    /// references.
    async fn upload_attachment(
        &self,
        config: &EnterpriseImConfig,
        attachment: &gateway_protocol::Attachment,
        is_image: bool,
        bytes: Vec<u8>,
    ) -> Result<String, AdapterError> {
        let file_name = attachment.name.clone().unwrap_or_else(|| if is_image { "image".to_string() } else { "file".to_string() });
        let (url, key_field, form) = if is_image {
            let part = multipart::Part::bytes(bytes).file_name(file_name);
            let form = multipart::Form::new().text("image_type", "message").part("image", part);
            (format!("{}/im/v1/images", config.base_url), "image_key", form)
        } else {
            let part = multipart::Part::bytes(bytes).file_name(file_name.clone());
            let form = multipart::Form::new()
                .text("file_type", guess_file_type(attachment.mime.as_deref()))
                .text("file_name", file_name)
                .part("file", part);
            (format!("{}/im/v1/files", config.base_url), "file_key", form)
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&config.tenant_access_token)
            .multipart(form)
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "upload".to_string(),
                message: text,
                code: status.to_string(),
            });
        }
        let body: Value = response.json().await.map_err(AdapterError::Transport)?;
        body.get("data")
            .and_then(|d| d.get(key_field))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "upload".to_string(),
                message: format!("response missing data.{key_field}"),
                code: "0".to_string(),
            })
    }

    async fn post_message(
        &self,
        config: &EnterpriseImConfig,
        target: &str,
        msg_type: &str,
        content: Value,
        reply: Option<&gateway_protocol::ReplyRef>,
    ) -> Result<(), AdapterError> {
        let url = match reply {
            Some(r) => format!("{}/im/v1/messages/{}/reply", config.base_url, r.message_id),
            None => format!("{}/im/v1/messages?receive_id_type=open_id", config.base_url),
        };
        let body = json!({
            "receive_id": target,
            "msg_type": msg_type,
            "content": content.to_string(),
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&config.tenant_access_token)
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Platform {
                platform: "enterprise_im".to_string(),
                op: "send".to_string(),
                message: text,
                code: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Maps message parts to the platform's rich-post tag shapes (§4.3 "map part variants to native
/// tags"). The `zh_cn` locale key is what the platform's post API always renders under (§9).
fn build_rich_post(parts: &[MessagePart]) -> Value {
    let tags: Vec<Value> = parts
        .iter()
        .map(|part| match part {
            MessagePart::Text { text } => json!({"tag": "text", "text": text}),
            MessagePart::Link { text, url } => json!({"tag": "a", "text": text, "href": url}),
            MessagePart::CodeBlock { code, .. } => json!({"tag": "text", "text": code}),
            MessagePart::Mention { target, display_name } => {
                json!({"tag": "at", "user_id": target, "user_name": display_name})
            }
            MessagePart::Emoji { name } => json!({"tag": "text", "text": format!(":{name}:")}),
        })
        .collect();
    json!({"zh_cn": {"title": "", "content": [tags]}})
}

/// The upload API takes a closed `file_type` vocabulary rather than a MIME type; unmapped MIME
/// types fall back to the generic `stream` type, which the platform accepts for any binary.
fn guess_file_type(mime: Option<&str>) -> String {
    match mime {
        Some("application/pdf") => "pdf",
        Some("application/msword") | Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document") => "doc",
        Some("application/vnd.ms-excel") | Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet") => "xls",
        Some("application/vnd.ms-powerpoint") | Some("application/vnd.openxmlformats-officedocument.presentationml.presentation") => "ppt",
        Some("audio/opus") | Some("audio/ogg") => "opus",
        Some("video/mp4") => "mp4",
        _ => "stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::contracts::Asset;
    use gateway_core::error::GatewayError;
    use std::io::Cursor;

    struct FakeBlob {
        bytes: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl Blob for FakeBlob {
        async fn open(&self, _bot_id: &str, _content_hash: &str) -> Result<(Box<dyn std::io::Read + Send>, Asset), GatewayError> {
            let bytes = self.bytes.clone();
            Ok((
                Box::new(Cursor::new(bytes.clone())),
                Asset { content_hash: "h".to_string(), mime: None, size: bytes.len() as u64 },
            ))
        }
    }

    #[test]
    fn rich_post_uses_zh_cn_locale_key() {
        let payload = build_rich_post(&[MessagePart::Text { text: "hi".to_string() }]);
        assert!(payload.get("zh_cn").is_some());
    }

    #[tokio::test]
    async fn attachment_bytes_prefers_content_hash_over_base64_and_url() {
        let sender = OutboundSender::new(Client::new(), Arc::new(FakeBlob { bytes: b"from-blob".to_vec() }));
        let attachment = gateway_protocol::Attachment {
            content_hash: Some("h1".to_string()),
            base64: Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"from-base64")),
            ..Default::default()
        };
        let bytes = sender.attachment_bytes("bot-1", &attachment).await.unwrap();
        assert_eq!(bytes, b"from-blob");
    }

    #[tokio::test]
    async fn attachment_bytes_decodes_base64_when_no_content_hash() {
        let sender = OutboundSender::new(Client::new(), Arc::new(FakeBlob { bytes: Vec::new() }));
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"inline-bytes");
        let attachment = gateway_protocol::Attachment { base64: Some(encoded), ..Default::default() };
        let bytes = sender.attachment_bytes("bot-1", &attachment).await.unwrap();
        assert_eq!(bytes, b"inline-bytes");
    }

    #[tokio::test]
    async fn attachment_bytes_is_unresolvable_with_no_reference() {
        let sender = OutboundSender::new(Client::new(), Arc::new(FakeBlob { bytes: Vec::new() }));
        let attachment = gateway_protocol::Attachment::default();
        let result = sender.attachment_bytes("bot-1", &attachment).await;
        assert!(matches!(result, Err(AdapterError::UnresolvableAttachment)));
    }
}
