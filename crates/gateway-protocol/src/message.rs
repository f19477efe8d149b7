use serde::{Deserialize, Serialize};

/// One ordered piece of a [`Message`]'s rich content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Link { text: String, url: String },
    CodeBlock { code: String, language: Option<String> },
    Mention { target: String, display_name: Option<String> },
    Emoji { name: String },
}

/// Attachment media kind, inferred per §4.2 media-type rules (mime prefix, else filename).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Gif,
    Video,
    Audio,
    File,
}

/// A media reference attached to a [`Message`].
///
/// Valid iff at least one of `platform_key`, `content_hash`, `base64`, `url` is set — callers
/// resolving an attachment should try them in that order (cheapest/most-specific first).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: Option<AttachmentKind>,
    pub mime: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub source_platform: Option<String>,
    pub platform_key: Option<String>,
    pub content_hash: Option<String>,
    pub url: Option<String>,
    pub base64: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

impl Attachment {
    /// True iff at least one resolvable reference is present (§3 Attachment invariant).
    pub fn is_resolvable(&self) -> bool {
        self.platform_key.is_some()
            || self.content_hash.is_some()
            || self.base64.is_some()
            || self.url.is_some()
    }

    /// Infers the attachment kind from a mime type, falling back to filename hints (§4.2.3).
    pub fn infer_kind(mime: Option<&str>, name: Option<&str>) -> AttachmentKind {
        let mime = mime.unwrap_or_default();
        let name = name.unwrap_or_default().to_ascii_lowercase();
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime.starts_with("video/") || mime.contains("mp4") || name.contains("mp4") {
            AttachmentKind::Video
        } else if mime.starts_with("audio/") {
            AttachmentKind::Audio
        } else {
            AttachmentKind::File
        }
    }
}

/// A reply reference: the message being replied to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: String,
}

/// Normalized rich message body shared by inbound and outbound messages.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    /// §8.4: a message is deliverable iff `text` is non-empty or it carries attachments.
    pub fn is_deliverable(&self) -> bool {
        !self.text.trim().is_empty() || !self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_resolvable_requires_a_reference() {
        assert!(!Attachment::default().is_resolvable());
        let a = Attachment { platform_key: Some("img_1".into()), ..Default::default() };
        assert!(a.is_resolvable());
    }

    #[test]
    fn infer_kind_prefers_mime_prefix() {
        assert_eq!(Attachment::infer_kind(Some("image/png"), None), AttachmentKind::Image);
        assert_eq!(Attachment::infer_kind(Some("video/mp4"), None), AttachmentKind::Video);
        assert_eq!(Attachment::infer_kind(None, Some("clip.mp4")), AttachmentKind::Video);
        assert_eq!(Attachment::infer_kind(Some("audio/ogg"), None), AttachmentKind::Audio);
        assert_eq!(Attachment::infer_kind(Some("application/pdf"), Some("doc.pdf")), AttachmentKind::File);
    }

    #[test]
    fn message_deliverable_on_text_or_attachment() {
        assert!(!Message::default().is_deliverable());
        assert!(Message::text("hi").is_deliverable());
        let with_attachment = Message {
            attachments: vec![Attachment::default()],
            ..Default::default()
        };
        assert!(with_attachment.is_deliverable());
        let whitespace_only = Message::text("   ");
        assert!(!whitespace_only.is_deliverable());
    }
}
