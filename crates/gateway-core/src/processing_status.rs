//! Cross-adapter "bot is thinking" cue: acquired on an inbound message, released exactly once on
//! the flow's first terminal event (§4.4, §S1, §3 ProcessingStatusHandle lifecycle).

use crate::adapter::{Adapter, ProcessingInfo, ProcessingStatusHandle};
use crate::contracts::ChannelConfig;

/// Stateless coordinator: each call simply forwards to the adapter's own
/// `processing_started`/`completed`/`failed`, logging and swallowing failures so a busy-cue
/// hiccup never blocks the underlying flow (§4.4: "the failure is surfaced" only applies to the
/// acquire step itself, which the adapter already reports via its `Result`).
#[derive(Default)]
pub struct ProcessingStatusCoordinator;

impl ProcessingStatusCoordinator {
    pub fn new() -> Self {
        Self
    }

    pub async fn started(
        &self,
        adapter: &dyn Adapter,
        config: &ChannelConfig,
        inbound: &gateway_protocol::InboundMessage,
        info: &ProcessingInfo,
    ) -> Option<ProcessingStatusHandle> {
        if info.source_message_id.is_none() {
            return None; // §4.4: no source message id, no-op, no handle.
        }
        match adapter.processing_started(config, inbound, info).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(target: "processing_status", %err, "processing_started failed");
                None
            }
        }
    }

    pub async fn completed(&self, adapter: &dyn Adapter, config: &ChannelConfig, handle: &ProcessingStatusHandle) {
        if let Err(err) = adapter.processing_completed(config, handle).await {
            tracing::warn!(target: "processing_status", %err, "processing_completed failed");
        }
    }

    pub async fn failed(&self, adapter: &dyn Adapter, config: &ChannelConfig, handle: &ProcessingStatusHandle) {
        if let Err(err) = adapter.processing_failed(config, handle).await {
            tracing::warn!(target: "processing_status", %err, "processing_failed failed");
        }
    }
}
