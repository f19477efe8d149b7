use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel_type::ChannelType;
use crate::message::Message;

/// A platform-native sender identity.
///
/// `attributes` carries whatever platform-scoped handles the adapter recognized (e.g. `open_id`,
/// `user_id`) — [`Adapter::build_user_config`] reads these, never guesses them from `subject_id`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub display_name: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Conversation kind an inbound event arrived in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Direct,
    Group,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConversationType,
}

/// Adapter-normalized inbound event, per §3/§4.2. Construction is the adapter's responsibility;
/// [`ChannelManager`] only ever sees this shape, never a raw platform payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: ChannelType,
    pub bot_id: String,
    pub message: Message,
    /// Platform-native destination a reply should be sent to (§4.2.4).
    pub reply_target: String,
    /// Per-bot-per-platform fan-out grouping key (glossary: Route key).
    pub route_key: String,
    pub sender: Identity,
    pub conversation: Conversation,
    pub received_at: DateTime<Utc>,
    /// Raw platform event id/source tag, carried through for diagnostics and dedup keys.
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// §4.2.5: whether the configured bot was mentioned in this event.
    pub fn is_mentioned(&self) -> bool {
        self.metadata
            .get("is_mentioned")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// §8.4/§4.2.6: droppable iff text is empty and there are no attachments.
    pub fn is_droppable(&self) -> bool {
        !self.message.is_deliverable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn base(message: Message) -> InboundMessage {
        InboundMessage {
            channel: ChannelType::EnterpriseIm,
            bot_id: "bot-1".into(),
            message,
            reply_target: "open_id:ou_abc".into(),
            route_key: "bot-1:enterprise_im".into(),
            sender: Identity::default(),
            conversation: Conversation { id: "oc_1".into(), kind: ConversationType::Direct },
            received_at: Utc::now(),
            source: "evt-1".into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn droppable_when_text_and_attachments_empty() {
        assert!(base(Message::default()).is_droppable());
        assert!(!base(Message::text("hi")).is_droppable());
    }

    #[test]
    fn is_mentioned_reads_metadata_flag() {
        let mut inbound = base(Message::text("hi"));
        assert!(!inbound.is_mentioned());
        inbound.metadata.insert("is_mentioned".into(), serde_json::json!(true));
        assert!(inbound.is_mentioned());
    }
}
