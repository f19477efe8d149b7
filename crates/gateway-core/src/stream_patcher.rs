//! Buffers `StreamEvent` deltas and coalesces them into rate-limited patches on a single external
//! "card" message (§4.3, §L8, §8 properties 5/8/11).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use gateway_protocol::{Attachment, StreamEvent};

use crate::error::AdapterError;

/// Placeholder shown before the first patch has real content.
const THINKING_PLACEHOLDER: &str = "Thinking...";
/// Card body length cap, in runes (chars), before truncation (§4.3: "~8000 runes").
const RUNE_CAP: usize = 8000;
/// Minimum spacing between patches unless the delta contains a newline (§4.3: "≈700 ms").
const PATCH_INTERVAL: Duration = Duration::from_millis(700);

/// What a platform-specific card implementation must provide: create the placeholder card and
/// patch its body. Implemented by the enterprise-IM adapter; kept here so the coalescing/timing
/// logic is shared and independently testable.
#[async_trait]
pub trait CardClient: Send + Sync {
    async fn create_card(&self, target: &str, reply_to: Option<&str>, initial_text: &str) -> Result<String, AdapterError>;
    async fn patch_card(&self, card_message_id: &str, text: &str) -> Result<(), AdapterError>;
    async fn deliver_attachment(&self, target: &str, attachment: &Attachment) -> Result<(), AdapterError>;
}

/// Normalizes raw delta/final text into card-displayable form (§4.3):
/// empty → thinking placeholder; ATX headings become bold; truncated to the last [`RUNE_CAP`]
/// runes with a `"...\n"` prefix when longer.
pub fn normalize_stream_text(input: &str) -> String {
    let extracted = extract_json_text(input).unwrap_or_else(|| input.to_string());
    let trimmed = extracted.trim();
    if trimmed.is_empty() {
        return THINKING_PLACEHOLDER.to_string();
    }

    let de_atx = atx_headings_to_bold(trimmed);
    truncate_runes(&de_atx, RUNE_CAP)
}

/// If `input` parses as JSON, extracts a human-readable field in priority order
/// (`text`/`message`/`content`/`result`/`output`/`response`/`answer`, else the first string in an
/// array), otherwise returns `None` so the caller keeps the original text (§4.3).
fn extract_json_text(input: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(input.trim()).ok()?;
    const FIELDS: &[&str] = &["text", "message", "content", "result", "output", "response", "answer"];
    if let Some(obj) = value.as_object() {
        for field in FIELDS {
            if let Some(s) = obj.get(*field).and_then(|v| v.as_str()) {
                return Some(s.to_string());
            }
        }
    }
    if let Some(array) = value.as_array() {
        if let Some(s) = array.iter().find_map(|v| v.as_str()) {
            return Some(s.to_string());
        }
    }
    None
}

fn atx_headings_to_bold(text: &str) -> String {
    let heading = regex::Regex::new(r"(?m)^#{1,6}\s+(.*)$").expect("valid heading regex");
    heading.replace_all(text, "**$1**").to_string()
}

fn truncate_runes(text: &str, cap: usize) -> String {
    let runes: Vec<char> = text.chars().collect();
    if runes.len() <= cap {
        return text.to_string();
    }
    let tail: String = runes[runes.len() - cap..].iter().collect();
    format!("...\n{tail}")
}

/// One in-flight card for one outbound stream. Not `Clone`/`Sync` by design: a single owning
/// flow drives `push` serially (§5 Ordering guarantees).
pub struct StreamPatcher<C: CardClient> {
    client: std::sync::Arc<C>,
    target: String,
    reply_to: Option<String>,
    buffer: String,
    card_message_id: Option<String>,
    last_patched_body: Option<String>,
    last_patch_at: Option<Instant>,
    closed: bool,
}

impl<C: CardClient> StreamPatcher<C> {
    pub fn new(client: std::sync::Arc<C>, target: String, reply_to: Option<String>) -> Self {
        Self {
            client,
            target,
            reply_to,
            buffer: String::new(),
            card_message_id: None,
            last_patched_body: None,
            last_patch_at: None,
            closed: false,
        }
    }

    pub async fn push(&mut self, event: StreamEvent) -> Result<(), AdapterError> {
        if self.closed {
            return Err(AdapterError::Unsupported("stream already closed".to_string()));
        }

        match event {
            StreamEvent::Delta { text } => {
                let had_newline = text.contains('\n');
                self.buffer.push_str(&text);
                self.ensure_card().await?;
                let due = self
                    .last_patch_at
                    .map(|t| t.elapsed() >= PATCH_INTERVAL)
                    .unwrap_or(true);
                if due || had_newline {
                    self.patch_if_changed().await?;
                }
            }
            StreamEvent::ToolCallStart { .. } => {
                self.ensure_card().await?;
                self.patch_body("Calling tools...").await?;
            }
            StreamEvent::Attachment { attachment } => {
                self.client.deliver_attachment(&self.target, &attachment).await?;
            }
            StreamEvent::Final { text } => {
                self.buffer = text;
                self.ensure_card().await?;
                self.patch_if_changed().await?;
            }
            StreamEvent::Error { message } => {
                self.ensure_card().await?;
                self.patch_body(&format!("Error: {message}")).await?;
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), AdapterError> {
        self.closed = true;
        Ok(())
    }

    async fn ensure_card(&mut self) -> Result<(), AdapterError> {
        if self.card_message_id.is_some() {
            return Ok(());
        }
        let initial = normalize_stream_text(&self.buffer);
        let id = self.client.create_card(&self.target, self.reply_to.as_deref(), &initial).await?;
        self.card_message_id = Some(id);
        self.last_patched_body = Some(initial);
        self.last_patch_at = Some(Instant::now());
        Ok(())
    }

    async fn patch_if_changed(&mut self) -> Result<(), AdapterError> {
        let normalized = normalize_stream_text(&self.buffer);
        self.patch_body(&normalized).await
    }

    /// Idempotent: a repeated normalized body results in exactly one platform call total (§8.8).
    async fn patch_body(&mut self, body: &str) -> Result<(), AdapterError> {
        if self.last_patched_body.as_deref() == Some(body) {
            return Ok(());
        }
        let card_id = self.card_message_id.clone().expect("ensure_card called first");
        self.client.patch_card(&card_id, body).await?;
        self.last_patched_body = Some(body.to_string());
        self.last_patch_at = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCardClient {
        patches: Mutex<Vec<String>>,
        patch_calls: AtomicUsize,
    }

    #[async_trait]
    impl CardClient for FakeCardClient {
        async fn create_card(&self, _target: &str, _reply_to: Option<&str>, initial_text: &str) -> Result<String, AdapterError> {
            self.patches.lock().unwrap().push(initial_text.to_string());
            Ok("card-1".to_string())
        }
        async fn patch_card(&self, _card_message_id: &str, text: &str) -> Result<(), AdapterError> {
            self.patch_calls.fetch_add(1, Ordering::SeqCst);
            self.patches.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn deliver_attachment(&self, _target: &str, _attachment: &Attachment) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[test]
    fn normalize_empty_is_thinking_placeholder() {
        assert_eq!(normalize_stream_text(""), THINKING_PLACEHOLDER);
        assert_eq!(normalize_stream_text("   "), THINKING_PLACEHOLDER);
    }

    #[test]
    fn normalize_truncates_with_prefix_and_bounded_length() {
        let long = "x".repeat(RUNE_CAP + 500);
        let out = normalize_stream_text(&long);
        assert!(out.starts_with("...\n"));
        assert!(out.chars().count() <= RUNE_CAP + 4);
    }

    #[test]
    fn atx_heading_becomes_bold() {
        let out = normalize_stream_text("# Title\nbody");
        assert!(out.contains("**Title**"));
        assert!(!out.contains('#'));
    }

    #[test]
    fn json_shaped_text_is_extracted() {
        let out = normalize_stream_text(r#"{"text": "hello world"}"#);
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn final_event_patches_once_and_skips_duplicate() {
        let client = std::sync::Arc::new(FakeCardClient::default());
        let mut patcher = StreamPatcher::new(client.clone(), "target".to_string(), None);
        patcher.push(StreamEvent::Final { text: "done".to_string() }).await.unwrap();
        // Re-delivering the exact same normalized body is a no-op (§8.8).
        patcher.push(StreamEvent::Final { text: "done".to_string() }).await.unwrap();
        assert_eq!(client.patch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let client = std::sync::Arc::new(FakeCardClient::default());
        let mut patcher = StreamPatcher::new(client, "target".to_string(), None);
        patcher.close().await.unwrap();
        let result = patcher.push(StreamEvent::Delta { text: "late".to_string() }).await;
        assert!(result.is_err());
    }
}
