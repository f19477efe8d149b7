//! Config/target normalization and inbound decoding for the enterprise-IM adapter (§4.1, §4.2).

use std::collections::HashMap;

use gateway_protocol::{Attachment, AttachmentKind, ChannelType, Conversation, ConversationType, Identity, InboundMessage, Message, MessagePart};
use serde_json::Value;

use gateway_core::contracts::UserChannelBinding;
use gateway_core::error::AdapterError;

/// Canonicalizes a raw config map: requires `app_id`, `app_secret`; `inbound_mode` defaults to
/// `"websocket"` and must be one of `websocket`/`webhook` (§4.1 `normalize_config`).
pub fn normalize_config(raw: HashMap<String, String>) -> Result<HashMap<String, String>, AdapterError> {
    let mut out = raw;
    require_field(&out, "app_id")?;
    require_field(&out, "app_secret")?;
    let mode = out.entry("inbound_mode".to_string()).or_insert_with(|| "websocket".to_string());
    if mode != "websocket" && mode != "webhook" {
        return Err(AdapterError::Validation {
            field: "inbound_mode".to_string(),
            reason: format!("must be `websocket` or `webhook`, got `{mode}`"),
        });
    }
    Ok(out)
}

pub fn normalize_user_config(raw: HashMap<String, String>) -> Result<HashMap<String, String>, AdapterError> {
    Ok(raw)
}

fn require_field(map: &HashMap<String, String>, field: &str) -> Result<(), AdapterError> {
    match map.get(field) {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(AdapterError::Validation { field: field.to_string(), reason: "required field missing".to_string() }),
    }
}

/// Maps a bare id to its tagged form: `ou_…` ⇒ `open_id:`, `oc_…` ⇒ `chat_id:`, otherwise defaults
/// to `open_id:` (§6 Platform targets). Already-tagged input passes through unchanged, making
/// this idempotent (§8 property 6).
pub fn normalize_target(raw: &str) -> String {
    if raw.contains(':') {
        return raw.to_string();
    }
    if let Some(rest) = raw.strip_prefix("ou_") {
        format!("open_id:ou_{rest}")
    } else if let Some(rest) = raw.strip_prefix("oc_") {
        format!("chat_id:oc_{rest}")
    } else {
        format!("open_id:{raw}")
    }
}

/// Prefers `open_id`, then `user_id`, then `chat_id` from a binding's attributes (§8 property 7).
pub fn resolve_target(binding: &UserChannelBinding) -> Result<String, AdapterError> {
    for key in ["open_id", "user_id", "chat_id"] {
        if let Some(v) = binding.attributes.get(key) {
            return Ok(normalize_target(v));
        }
    }
    Err(AdapterError::Validation {
        field: "attributes".to_string(),
        reason: "no open_id/user_id/chat_id on binding".to_string(),
    })
}

pub fn build_user_config(identity: &Identity) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for key in ["open_id", "user_id"] {
        if let Some(v) = identity.attributes.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    out
}

pub fn match_binding(binding: &UserChannelBinding, criteria: &HashMap<String, String>) -> bool {
    criteria.iter().any(|(k, v)| binding.attributes.get(k) == Some(v))
}

/// Decodes a platform event payload into an `InboundMessage` (§4.2). Returns `None` when the
/// event carries neither text nor attachments (§4.2.6).
pub fn decode_inbound(
    bot_id: &str,
    event: &Value,
    self_open_id: Option<&str>,
) -> Option<InboundMessage> {
    let message_event = event.get("event")?.get("message")?;
    let message_type = message_event.get("message_type")?.as_str()?;
    let content_raw = message_event.get("content")?.as_str()?;
    let content: Value = serde_json::from_str(content_raw).ok()?;

    let (text, attachments) = match message_type {
        "text" => (content.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(), Vec::new()),
        "post" => decode_post(&content),
        "image" => (String::new(), vec![image_attachment(&content)]),
        "file" | "audio" | "media" => (String::new(), vec![file_attachment(&content)]),
        _ => (String::new(), Vec::new()),
    };

    if text.trim().is_empty() && attachments.is_empty() {
        return None;
    }

    let chat_id = message_event.get("chat_id").and_then(|v| v.as_str()).unwrap_or_default();
    let chat_type = message_event.get("chat_type").and_then(|v| v.as_str()).unwrap_or("p2p");
    let sender_id = event
        .get("event")
        .and_then(|e| e.get("sender"))
        .and_then(|s| s.get("sender_id"));
    let open_id = sender_id.and_then(|s| s.get("open_id")).and_then(|v| v.as_str());
    let user_id = sender_id.and_then(|s| s.get("user_id")).and_then(|v| v.as_str());

    let reply_target = if chat_type == "group" {
        format!("chat_id:{chat_id}")
    } else {
        match (open_id, user_id) {
            (Some(oid), _) => oid.to_string(),
            (None, Some(uid)) => uid.to_string(),
            (None, None) => String::new(),
        }
    };

    let is_mentioned = compute_is_mentioned(event, &content, self_open_id);

    let mut attrs = HashMap::new();
    if let Some(oid) = open_id {
        attrs.insert("open_id".to_string(), oid.to_string());
    }
    if let Some(uid) = user_id {
        attrs.insert("user_id".to_string(), uid.to_string());
    }

    let mut metadata = HashMap::new();
    metadata.insert("is_mentioned".to_string(), serde_json::json!(is_mentioned));

    Some(InboundMessage {
        channel: ChannelType::EnterpriseIm,
        bot_id: bot_id.to_string(),
        message: Message { text, attachments, ..Default::default() },
        reply_target,
        route_key: format!("{bot_id}:enterprise_im"),
        sender: Identity {
            subject_id: open_id.or(user_id).unwrap_or_default().to_string(),
            display_name: String::new(),
            attributes: attrs,
        },
        conversation: Conversation {
            id: chat_id.to_string(),
            kind: if chat_type == "group" { ConversationType::Group } else { ConversationType::Direct },
        },
        received_at: chrono::Utc::now(),
        source: event.get("header").and_then(|h| h.get("event_id")).and_then(|v| v.as_str()).unwrap_or("").to_string(),
        metadata,
    })
}

/// Concatenates recognized post tags into a space-joined trimmed body; `at` tags render as
/// `@<name>`; `img`/`file` tags become `Attachment` entries keyed by `metadata.message_id`
/// (§4.2.2).
fn decode_post(content: &Value) -> (String, Vec<Attachment>) {
    let mut parts = Vec::new();
    let mut attachments = Vec::new();
    let Some(post) = content.get("post").and_then(|p| p.as_object()) else {
        return (String::new(), Vec::new());
    };
    let Some(body) = post.values().next().and_then(|v| v.get("content")).and_then(|v| v.as_array()) else {
        return (String::new(), Vec::new());
    };
    for line in body {
        let Some(line) = line.as_array() else { continue };
        for tag in line {
            match tag.get("tag").and_then(|v| v.as_str()) {
                Some("text") => {
                    if let Some(text) = tag.get("text").and_then(|v| v.as_str()) {
                        parts.push(text.to_string());
                    }
                }
                Some("a") => {
                    if let Some(text) = tag.get("text").and_then(|v| v.as_str()) {
                        parts.push(text.to_string());
                    }
                }
                Some("at") => {
                    if let Some(name) = tag.get("user_name").and_then(|v| v.as_str()) {
                        parts.push(format!("@{name}"));
                    }
                }
                Some("img") => {
                    if let Some(key) = tag.get("image_key").and_then(|v| v.as_str()) {
                        attachments.push(Attachment { kind: Some(AttachmentKind::Image), platform_key: Some(key.to_string()), ..Default::default() });
                    }
                }
                Some("file") => {
                    if let Some(key) = tag.get("file_key").and_then(|v| v.as_str()) {
                        attachments.push(Attachment { kind: Some(AttachmentKind::File), platform_key: Some(key.to_string()), ..Default::default() });
                    }
                }
                _ => {}
            }
        }
    }
    (parts.join(" ").trim().to_string(), attachments)
}

fn image_attachment(content: &Value) -> Attachment {
    let key = content.get("image_key").and_then(|v| v.as_str()).map(str::to_string);
    Attachment { kind: Some(AttachmentKind::Image), platform_key: key, ..Default::default() }
}

fn file_attachment(content: &Value) -> Attachment {
    let key = content.get("file_key").and_then(|v| v.as_str()).map(str::to_string);
    let name = content.get("file_name").and_then(|v| v.as_str()).map(str::to_string);
    let mime = content.get("mime_type").and_then(|v| v.as_str()).map(str::to_string);
    let kind = Attachment::infer_kind(mime.as_deref(), name.as_deref());
    Attachment { kind: Some(kind), platform_key: key, name, mime, ..Default::default() }
}

/// §4.2.5: with a known bot `open_id`, mention is matched against the `mentions` array or a
/// recursive scan of `at` tags; without one, any mention evidence (including textual fallback
/// markers) counts.
fn compute_is_mentioned(event: &Value, content: &Value, self_open_id: Option<&str>) -> bool {
    let mentions = event.get("event").and_then(|e| e.get("message")).and_then(|m| m.get("mentions")).and_then(|v| v.as_array());

    if let Some(self_id) = self_open_id {
        if let Some(mentions) = mentions {
            if mentions.iter().any(|m| m.get("id").and_then(|i| i.get("open_id")).and_then(|v| v.as_str()) == Some(self_id)) {
                return true;
            }
        }
        return scan_post_at_tags(content, self_id);
    }

    if mentions.map(|m| !m.is_empty()).unwrap_or(false) {
        return true;
    }
    if scan_post_at_tags_any(content) {
        return true;
    }
    let text = content.get("text").and_then(|v| v.as_str()).unwrap_or("");
    text.contains("@_user_") || text.contains("<at ") || text.contains("</at>")
}

fn scan_post_at_tags(content: &Value, self_open_id: &str) -> bool {
    let Some(post) = content.get("post").and_then(|p| p.as_object()) else { return false };
    post.values().any(|lang| {
        lang.get("content").and_then(|v| v.as_array()).map(|lines| {
            lines.iter().any(|line| {
                line.as_array().map(|tags| {
                    tags.iter().any(|tag| {
                        tag.get("tag").and_then(|v| v.as_str()) == Some("at")
                            && (tag.get("user_id").and_then(|v| v.as_str()) == Some(self_open_id)
                                || tag.get("open_id").and_then(|v| v.as_str()) == Some(self_open_id))
                    })
                }).unwrap_or(false)
            })
        }).unwrap_or(false)
    })
}

fn scan_post_at_tags_any(content: &Value) -> bool {
    let Some(post) = content.get("post").and_then(|p| p.as_object()) else { return false };
    post.values().any(|lang| {
        lang.get("content").and_then(|v| v.as_array()).map(|lines| {
            lines.iter().any(|line| {
                line.as_array().map(|tags| tags.iter().any(|t| t.get("tag").and_then(|v| v.as_str()) == Some("at"))).unwrap_or(false)
            })
        }).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_target_is_idempotent() {
        for raw in ["ou_abc", "oc_xyz", "plain", "open_id:ou_abc"] {
            let once = normalize_target(raw);
            assert_eq!(normalize_target(&once), once);
        }
    }

    #[test]
    fn normalize_target_tags_known_prefixes() {
        assert_eq!(normalize_target("ou_abc"), "open_id:ou_abc");
        assert_eq!(normalize_target("oc_abc"), "chat_id:oc_abc");
        assert_eq!(normalize_target("plain"), "open_id:plain");
    }

    #[test]
    fn resolve_target_prefers_open_id() {
        let mut attrs = HashMap::new();
        attrs.insert("open_id".to_string(), "ou_1".to_string());
        attrs.insert("user_id".to_string(), "u1".to_string());
        let binding = UserChannelBinding { user_id: "u1".to_string(), channel_type: ChannelType::EnterpriseIm, attributes: attrs };
        assert_eq!(resolve_target(&binding).unwrap(), "open_id:ou_1");
    }

    #[test]
    fn normalize_config_requires_app_credentials() {
        let err = normalize_config(HashMap::new()).unwrap_err();
        assert!(matches!(err, AdapterError::Validation { field, .. } if field == "app_id"));
    }

    #[test]
    fn decode_inbound_drops_empty_text_message() {
        let event = serde_json::json!({
            "header": {"event_id": "e1"},
            "event": {
                "message": {"message_type": "text", "content": "{\"text\": \"  \"}", "chat_id": "oc_1", "chat_type": "p2p"},
                "sender": {"sender_id": {"open_id": "ou_1"}}
            }
        });
        assert!(decode_inbound("bot-1", &event, None).is_none());
    }

    #[test]
    fn decode_inbound_sets_mentioned_from_known_self_id() {
        let event = serde_json::json!({
            "header": {"event_id": "e1"},
            "event": {
                "message": {
                    "message_type": "text",
                    "content": "{\"text\": \"hi\"}",
                    "chat_id": "oc_1",
                    "chat_type": "group",
                    "mentions": [{"id": {"open_id": "ou_bot"}}]
                },
                "sender": {"sender_id": {"open_id": "ou_1"}}
            }
        });
        let inbound = decode_inbound("bot-1", &event, Some("ou_bot")).unwrap();
        assert!(inbound.is_mentioned());
        assert_eq!(inbound.reply_target, "chat_id:oc_1");
    }

    #[test]
    fn decode_inbound_p2p_reply_target_is_bare_sender_id() {
        let event = serde_json::json!({
            "header": {"event_id": "e1"},
            "event": {
                "message": {"message_type": "text", "content": "{\"text\": \"hi\"}", "chat_id": "oc_1", "chat_type": "p2p"},
                "sender": {"sender_id": {"open_id": "ou_1"}}
            }
        });
        let inbound = decode_inbound("bot-1", &event, None).unwrap();
        assert_eq!(inbound.reply_target, "ou_1");
    }
}
