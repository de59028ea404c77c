//! Observer notifications.

use parley_core::{ChannelState, SyncError};
use parley_proto::{ConversationId, MessageId, UserId, UserRef};

/// Externally observable state deltas.
///
/// Observers read the new state from the engine; notifications only say what
/// changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// The active conversation's messages changed.
    MessagesChanged {
        /// Active conversation.
        conversation_id: ConversationId,
    },

    /// The conversation list was reordered or a summary changed.
    ConversationsChanged,

    /// Typing users of a conversation changed.
    TypingChanged {
        /// Affected conversation.
        conversation_id: ConversationId,
        /// Users now typing, sorted.
        users: Vec<UserId>,
    },

    /// The channel connection state changed.
    ConnectionChanged(ChannelState),

    /// A user came online or went offline.
    PresenceChanged {
        /// Affected user.
        user_id: UserId,
        /// Online after the change.
        online: bool,
    },

    /// A snapshot fetch or lookup failed. Shown once; the user may retry.
    FetchFailed {
        /// Failure.
        error: SyncError,
    },

    /// A durable send failed and its optimistic entry was removed.
    SendFailed {
        /// Temporary id of the removed entry.
        temp_id: MessageId,
        /// Failure.
        error: SyncError,
    },

    /// User search results.
    SearchResults {
        /// Query the results answer.
        query: String,
        /// Matching users.
        users: Vec<UserRef>,
    },

    /// Inbound data was malformed and dropped.
    EventRejected {
        /// Event or response the data arrived as.
        source: String,
        /// Failure.
        error: SyncError,
    },

    /// A user command was refused.
    CommandRejected {
        /// Failure.
        error: SyncError,
    },
}
