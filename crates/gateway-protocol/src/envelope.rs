//! Envelope (bot_id, route_key, sequence) stamped onto each [`StreamEvent`] JSON value, mirroring
//! the non-destructive injection pattern used for the stream protocol's own envelope.

use serde_json::Value;

use crate::event::StreamEvent;

/// Routing fields every outbound event carries alongside its type + payload.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    pub bot_id: Option<String>,
    pub route_key: Option<String>,
    pub sequence: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bot_id(mut self, id: impl Into<String>) -> Self {
        self.bot_id = Some(id.into());
        self
    }

    pub fn with_route_key(mut self, key: impl Into<String>) -> Self {
        self.route_key = Some(key.into());
        self
    }

    pub fn with_sequence(mut self, seq: u64) -> Self {
        self.sequence = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only). Does not overwrite
    /// existing keys, so a flow runner that already stamped its own field wins.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.bot_id {
            obj.entry("bot_id").or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref key) = self.route_key {
            obj.entry("route_key").or_insert_with(|| Value::String(key.clone()));
        }
        if let Some(seq) = self.sequence {
            obj.entry("sequence")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Per-flow envelope state: constant `bot_id`/`route_key`, monotonically increasing `sequence`.
pub struct EnvelopeState {
    pub bot_id: String,
    pub route_key: String,
    next_sequence: u64,
}

impl EnvelopeState {
    pub fn new(bot_id: impl Into<String>, route_key: impl Into<String>) -> Self {
        Self { bot_id: bot_id.into(), route_key: route_key.into(), next_sequence: 0 }
    }

    /// Injects envelope into the event value and advances the sequence counter.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_bot_id(self.bot_id.clone())
            .with_route_key(self.route_key.clone())
            .with_sequence(self.next_sequence);
        self.next_sequence += 1;
        env.inject_into(value);
    }
}

/// Converts a stream event to JSON and injects envelope fields using the given state.
pub fn to_json(event: &StreamEvent, state: &mut EnvelopeState) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_does_not_overwrite_existing_keys() {
        let mut obj = serde_json::json!({"type": "delta", "text": "hi", "bot_id": "keep-me"});
        let env = Envelope::new().with_bot_id("overwritten").with_route_key("r1").with_sequence(0);
        env.inject_into(&mut obj);
        assert_eq!(obj["bot_id"], "keep-me");
        assert_eq!(obj["route_key"], "r1");
        assert_eq!(obj["sequence"], 0);
    }

    #[test]
    fn to_json_advances_sequence_across_calls() {
        let mut state = EnvelopeState::new("bot-1", "bot-1:guild");
        let first = to_json(&StreamEvent::Delta { text: "a".into() }, &mut state).unwrap();
        let second = to_json(&StreamEvent::Delta { text: "b".into() }, &mut state).unwrap();
        assert_eq!(first["sequence"], 0);
        assert_eq!(second["sequence"], 1);
        assert_eq!(first["bot_id"], "bot-1");
        assert_eq!(first["route_key"], "bot-1:guild");
    }
}
