//! Inbound dispatch: decodes gating, invokes the `FlowRunner`, and drives the outbound
//! stream/send back to the adapter (§L6, §8 property 4).

use std::sync::Arc;

use futures_util::StreamExt;
use gateway_protocol::{InboundMessage, OutboundMessage, StreamEvent};
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, OpenStreamOptions, ProcessingInfo};
use crate::contracts::{ChannelConfig, FlowRunner};
use crate::error::GatewayError;
use crate::processing_status::ProcessingStatusCoordinator;

/// Dispatches one inbound message to the flow runner and drives the resulting event stream back
/// out through the owning adapter.
pub struct ChannelManager {
    flow_runner: Arc<dyn FlowRunner>,
    processing: ProcessingStatusCoordinator,
}

impl ChannelManager {
    pub fn new(flow_runner: Arc<dyn FlowRunner>) -> Self {
        Self { flow_runner, processing: ProcessingStatusCoordinator::new() }
    }

    /// Runs mention/policy gating and, if the message passes, invokes the flow and streams its
    /// output back through the adapter. Always runs on its own task so the platform client's
    /// synchronous callback is never blocked (§5 Ordering guarantees).
    pub async fn handle_inbound(
        &self,
        adapter: Arc<dyn Adapter>,
        config: ChannelConfig,
        inbound: InboundMessage,
        cancel: CancellationToken,
    ) {
        if inbound.is_droppable() {
            tracing::debug!(target: "channel_manager", bot_id = %inbound.bot_id, "dropping empty inbound");
            return;
        }
        if !inbound.is_mentioned() && matches!(inbound.conversation.kind, gateway_protocol::ConversationType::Group) {
            tracing::debug!(target: "channel_manager", bot_id = %inbound.bot_id, "not mentioned in group, skipping");
            return;
        }

        let handle = self
            .processing
            .started(adapter.as_ref(), &config, &inbound, &ProcessingInfo { source_message_id: inbound.message.id.clone() })
            .await;

        let stream = match self.flow_runner.run(inbound.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(target: "channel_manager", bot_id = %inbound.bot_id, %err, "flow run failed");
                if let Some(handle) = handle {
                    self.processing.failed(adapter.as_ref(), &config, &handle).await;
                }
                return;
            }
        };

        self.drive_stream(adapter, config, inbound, stream, handle, cancel).await;
    }

    async fn drive_stream(
        &self,
        adapter: Arc<dyn Adapter>,
        config: ChannelConfig,
        inbound: InboundMessage,
        mut stream: std::pin::Pin<Box<dyn tokio_stream::Stream<Item = StreamEvent> + Send>>,
        handle: Option<crate::adapter::ProcessingStatusHandle>,
        cancel: CancellationToken,
    ) {
        let target = inbound.reply_target.clone();
        let capabilities = adapter.descriptor().capabilities;

        let mut outbound_stream = if capabilities.streaming {
            match adapter.open_stream(&config, &target, OpenStreamOptions::default()).await {
                Ok(s) => Some(s),
                Err(err) => {
                    tracing::warn!(target: "channel_manager", %err, "open_stream failed, falling back to send");
                    None
                }
            }
        } else {
            None
        };

        let mut terminal_failed = false;
        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            if event.is_terminal() && matches!(event, StreamEvent::Error { .. }) {
                terminal_failed = true;
            }
            if let Some(out) = outbound_stream.as_mut() {
                if let Err(err) = out.push(event).await {
                    tracing::warn!(target: "channel_manager", %err, "stream push failed");
                    break;
                }
            } else if let StreamEvent::Final { text, .. } = &event {
                let message = gateway_protocol::Message::text(text.clone());
                let _ = adapter.send(&config, OutboundMessage { target: target.clone(), message }).await;
            }
        }

        if let Some(mut out) = outbound_stream {
            let _ = out.close().await;
        }

        if let Some(handle) = handle {
            if terminal_failed {
                self.processing.failed(adapter.as_ref(), &config, &handle).await;
            } else {
                self.processing.completed(adapter.as_ref(), &config, &handle).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::{Conversation, ConversationType, Identity, Message};

    fn inbound_fixture(text: &str, mentioned: bool) -> InboundMessage {
        InboundMessage {
            channel: gateway_protocol::ChannelType::Guild,
            bot_id: "bot-1".to_string(),
            message: Message::text(text),
            reply_target: "12345".to_string(),
            route_key: "bot-1:guild".to_string(),
            sender: Identity { subject_id: "u1".to_string(), display_name: "u".to_string(), attributes: Default::default() },
            conversation: Conversation { id: "c1".to_string(), kind: ConversationType::Group },
            received_at: chrono::Utc::now(),
            source: "guild".to_string(),
            metadata: {
                let mut m = std::collections::HashMap::new();
                m.insert("is_mentioned".to_string(), serde_json::json!(mentioned));
                m
            },
        }
    }

    #[test]
    fn droppable_inbound_has_no_text_or_attachments() {
        let inbound = inbound_fixture("", false);
        assert!(inbound.is_droppable());
    }

    #[test]
    fn non_empty_text_inbound_is_not_droppable() {
        let inbound = inbound_fixture("hello", false);
        assert!(!inbound.is_droppable());
    }
}
