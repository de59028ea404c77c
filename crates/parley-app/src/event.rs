//! Engine input events.
//!
//! This module defines [`SyncEvent`], everything the driver reports back to
//! the [`crate::SyncEngine`]:
//! - Completions of request/response calls started by a [`crate::SyncAction`].
//! - Channel lifecycle transitions and raw inbound frames.

use parley_proto::{ChannelFrame, Conversation, ConversationId, Message, MessageId, UserId, UserRef};

/// Events processed by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The realtime channel is connected.
    ChannelOpened,

    /// The realtime channel failed to connect or dropped.
    ChannelClosed {
        /// Transport-provided reason.
        reason: String,
    },

    /// Raw frame received on the channel.
    ChannelFrame(ChannelFrame),

    /// Conversation list snapshot.
    ConversationsLoaded(Vec<Conversation>),

    /// Conversation list fetch failed.
    ConversationsFailed {
        /// Error description.
        error: String,
    },

    /// Message snapshot of a conversation.
    MessagesLoaded {
        /// Conversation the snapshot belongs to.
        conversation_id: ConversationId,
        /// Generation of the request.
        generation: u64,
        /// Messages in any order.
        messages: Vec<Message>,
    },

    /// Message snapshot fetch failed.
    MessagesFailed {
        /// Conversation the fetch was for.
        conversation_id: ConversationId,
        /// Generation of the request.
        generation: u64,
        /// Error description.
        error: String,
    },

    /// A durable send succeeded.
    MessageSent {
        /// Temporary id of the optimistic entry.
        temp_id: MessageId,
        /// Confirmed message.
        message: Message,
    },

    /// A durable send failed.
    MessageSendFailed {
        /// Temporary id of the optimistic entry.
        temp_id: MessageId,
        /// Error description.
        error: String,
    },

    /// A conversation was created or an existing one returned.
    ConversationCreated(Conversation),

    /// Conversation creation failed.
    ConversationCreateFailed {
        /// Requested participant.
        participant_id: UserId,
        /// Error description.
        error: String,
    },

    /// User search results.
    UsersFound {
        /// Query the results answer.
        query: String,
        /// Matching users.
        users: Vec<UserRef>,
    },

    /// User search failed.
    SearchFailed {
        /// Query that failed.
        query: String,
        /// Error description.
        error: String,
    },
}
