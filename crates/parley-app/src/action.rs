//! Engine side-effects.
//!
//! This module defines the [`SyncAction`] enum: instructions produced by the
//! [`crate::SyncEngine`] for the driver to execute. Request/response calls
//! report their completion later as a [`crate::SyncEvent`].

use parley_core::SessionCredentials;
use parley_proto::{ChannelFrame, ConversationId, MessageId, UserId};

use crate::StateChange;

/// Actions produced by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Fetch the conversation list snapshot.
    FetchConversations,

    /// Fetch the message snapshot of a conversation.
    FetchMessages {
        /// Conversation to fetch.
        conversation_id: ConversationId,
        /// Request generation, echoed back in the response.
        generation: u64,
    },

    /// Durably send a message.
    PostMessage {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Message text.
        content: String,
        /// Temporary id of the optimistic entry, echoed back in the response.
        temp_id: MessageId,
    },

    /// Create (or reuse) a direct conversation with a user.
    CreateConversation {
        /// The other participant.
        participant_id: UserId,
    },

    /// Search the user directory.
    SearchUsers {
        /// Search text.
        query: String,
    },

    /// Open the realtime channel.
    OpenChannel {
        /// Session credentials.
        credentials: SessionCredentials,
    },

    /// Send a frame over the realtime channel.
    Emit(ChannelFrame),

    /// Close the realtime channel.
    CloseChannel,

    /// Inform observers of a state change.
    Notify(StateChange),
}

impl SyncAction {
    /// True for request/response calls that complete with a
    /// [`crate::SyncEvent`].
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::FetchConversations
                | Self::FetchMessages { .. }
                | Self::PostMessage { .. }
                | Self::CreateConversation { .. }
                | Self::SearchUsers { .. }
        )
    }
}
