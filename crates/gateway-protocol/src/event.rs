//! Streaming response events (§3 StreamEvent, §4.3, §9 "coroutine-style streaming").
//!
//! The flow runner produces a lazy `Stream<Item = StreamEvent>`; an adapter's outbound stream
//! consumes it until a terminal [`StreamEvent::Final`] or [`StreamEvent::Error`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Attachment;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { state: String },
    Delta { text: String },
    ToolCallStart { call_id: String, name: String, arguments: Value },
    ToolCallEnd {
        call_id: String,
        name: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Attachment { attachment: Attachment },
    AgentStart { agent: String },
    AgentEnd { agent: String },
    PhaseStart { phase: String },
    PhaseEnd { phase: String },
    ProcessingStarted,
    ProcessingCompleted,
    ProcessingFailed { reason: String },
    Final { text: String },
    Error { message: String },
}

impl StreamEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// §9: the outbound stream runs until a terminal `Final`/`Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Final { .. } | StreamEvent::Error { .. })
    }

    /// Text this event contributes to a patched card body, per §4.3's patching rules. Returns
    /// `None` for events that don't carry renderable text (tool-call/lifecycle markers).
    pub fn delta_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Delta { text } => Some(text),
            StreamEvent::Final { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events_are_final_or_error() {
        assert!(StreamEvent::Final { text: "done".into() }.is_terminal());
        assert!(StreamEvent::Error { message: "boom".into() }.is_terminal());
        assert!(!StreamEvent::Delta { text: "...".into() }.is_terminal());
        assert!(!StreamEvent::ProcessingStarted.is_terminal());
    }

    #[test]
    fn serializes_with_snake_case_type_tag() {
        let v = StreamEvent::Delta { text: "hi".into() }.to_value().unwrap();
        assert_eq!(v["type"], "delta");
        assert_eq!(v["text"], "hi");
    }

    #[test]
    fn delta_text_only_on_text_bearing_variants() {
        assert_eq!(StreamEvent::Delta { text: "a".into() }.delta_text(), Some("a"));
        assert_eq!(StreamEvent::Final { text: "b".into() }.delta_text(), Some("b"));
        assert_eq!(StreamEvent::ProcessingStarted.delta_text(), None);
    }
}
