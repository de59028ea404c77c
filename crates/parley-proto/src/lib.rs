//! Parley protocol types.
//!
//! Data model shared by the sync engine and its collaborators, plus the codec
//! for events carried over the realtime channel.
//!
//! # Components
//!
//! - [`ids`]: string identifiers and the millisecond [`Timestamp`]
//! - [`model`]: [`Conversation`], [`Message`], and related summaries
//! - [`event`]: inbound [`PushEvent`]s, outbound [`OutboundEvent`]s, and the
//!   raw [`ChannelFrame`] they travel in
//!
//! Event payloads are CBOR encoded. The frame carries the event name, so the
//! payload contains only the inner struct, never a variant tag.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod model;

pub use errors::{ProtocolError, Result};
pub use event::{
    ChannelFrame, EventName, JoinPayload, LocalTypingPayload, OutboundEvent, PresencePayload,
    PushEvent, TypingPayload,
};
pub use ids::{ConversationId, MessageId, Timestamp, UserId};
pub use model::{Conversation, Message, MessageSummary, UserRef};
