//! Driver input.
//!
//! A driver feeds the runtime two kinds of input: commands from the user and
//! events from the transport.

use parley_proto::{ConversationId, UserId};

use crate::SyncEvent;

/// Commands issued by the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Open a conversation.
    SelectConversation(ConversationId),
    /// Send a message to the open conversation.
    SendMessage(String),
    /// Keystroke activity (`true`) or input blur (`false`).
    Typing(bool),
    /// Start a direct conversation with a user.
    StartConversation(UserId),
    /// Search the user directory.
    SearchUsers(String),
    /// Re-fetch the conversation list.
    Refresh,
    /// End the session.
    Quit,
}

/// Input returned by [`crate::Driver::next_input`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverInput {
    /// User command.
    Command(UserCommand),
    /// Transport event.
    Event(SyncEvent),
}
