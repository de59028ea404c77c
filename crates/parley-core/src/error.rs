//! Error types for the Parley core.
//!
//! Store and channel errors are precise and local. [`SyncError`] is the
//! engine-level taxonomy that decides what happens next: retry, drop, resolve,
//! or discard. None of them is fatal.

use parley_proto::{ConversationId, EventName, MessageId, ProtocolError};
use thiserror::Error;

/// Errors raised by [`crate::ConversationStore`] and [`crate::MessageStore`].
///
/// A store that returns an error has not changed its state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Input failed validation (missing id, empty conversation id).
    #[error("invalid input: {0}")]
    Validation(#[from] ProtocolError),

    /// Message belongs to a different conversation than the store's scope.
    #[error("message for conversation {got} does not belong to {expected}")]
    WrongConversation {
        /// Conversation the store is scoped to.
        expected: ConversationId,
        /// Conversation the message claims.
        got: ConversationId,
    },

    /// Store has no conversation scope yet.
    #[error("no active conversation")]
    NoConversation,

    /// Optimistic append of a message that is not marked pending.
    #[error("message {0} is not pending")]
    NotPending(MessageId),

    /// A message with this id is already stored.
    #[error("duplicate message id {0}")]
    DuplicateId(MessageId),
}

/// Errors raised by [`crate::RealtimeChannel`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Outbound event dropped because the channel is not connected.
    #[error("channel not connected, dropped {event} event")]
    NotConnected {
        /// Name of the dropped event.
        event: EventName,
    },
}

/// Engine-level error taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network failure (channel drop, failed fetch). Retried or surfaced once.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Malformed input. Dropped and logged; never mutates state.
    #[error("validation error: {0}")]
    Validation(String),

    /// Reconciliation collision, resolved deterministically.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Response for a superseded request. Silently discarded.
    #[error("stale response for generation {generation} (current {current})")]
    StaleResponse {
        /// Generation the response was requested under.
        generation: u64,
        /// Current generation.
        current: u64,
    },
}

impl SyncError {
    /// Returns true if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId(id) => Self::Conflict(format!("duplicate message id {id}")),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<ChannelError> for SyncError {
    fn from(err: ChannelError) -> Self {
        Self::TransientNetwork(err.to_string())
    }
}
