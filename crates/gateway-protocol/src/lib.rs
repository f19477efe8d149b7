//! Wire types shared across the gateway: normalized messages, stream events, and the envelope
//! stamped onto each outbound event.
//!
//! This crate has no adapter- or transport-specific dependencies; `gateway-core` and
//! `gateway-adapters` build on top of these shapes.

pub mod channel_type;
pub mod envelope;
pub mod event;
pub mod inbound;
pub mod message;
pub mod outbound;

pub use channel_type::ChannelType;
pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::StreamEvent;
pub use inbound::{Conversation, ConversationType, Identity, InboundMessage};
pub use message::{Attachment, AttachmentKind, Message, MessagePart, ReplyRef};
pub use outbound::OutboundMessage;
