use serde::{Deserialize, Serialize};

use crate::message::Message;

/// A message queued for delivery to an adapter-specific normalized target (§3 OutboundMessage).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub target: String,
    pub message: Message,
}
