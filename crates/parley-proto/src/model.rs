//! Conversation and message records.
//!
//! These are the shapes returned by snapshot fetches and carried in
//! `message:new` push events. Field names are camelCase on the wire.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageId, ProtocolError, Result, Timestamp, UserId};

/// Reference to a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserRef {
    /// User id.
    pub id: UserId,
    /// Login handle.
    pub username: String,
    /// Display name.
    pub name: String,
}

impl UserRef {
    /// Create a user reference.
    pub fn new(id: impl Into<UserId>, username: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), username: username.into(), name: name.into() }
    }
}

/// Preview of the latest message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    /// Message id.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
    /// Server timestamp.
    pub created_at: Timestamp,
}

/// Conversation summary as shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// Participants, including the local user.
    #[serde(default)]
    pub participants: BTreeSet<UserRef>,
    /// Group conversation (more than two participants or explicitly named).
    #[serde(default)]
    pub is_group: bool,
    /// Group name. `None` for direct conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Latest message preview. `None` if the conversation has no messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageSummary>,
    /// Messages received while the conversation was not active.
    #[serde(default)]
    pub unread_count: u32,
    /// Time of the latest activity.
    pub updated_at: Timestamp,
}

impl Conversation {
    /// Empty direct conversation.
    pub fn new(id: impl Into<ConversationId>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            participants: BTreeSet::new(),
            is_group: false,
            group_name: None,
            last_message: None,
            unread_count: 0,
            updated_at,
        }
    }

    /// Add a participant.
    #[must_use]
    pub fn with_participant(mut self, user: UserRef) -> Self {
        self.participants.insert(user);
        self
    }

    /// Mark as a named group conversation.
    #[must_use]
    pub fn with_group_name(mut self, name: impl Into<String>) -> Self {
        self.is_group = true;
        self.group_name = Some(name.into());
        self
    }

    /// Set the unread counter.
    #[must_use]
    pub fn with_unread(mut self, unread_count: u32) -> Self {
        self.unread_count = unread_count;
        self
    }

    /// Title for the conversation list, from the point of view of `me`.
    ///
    /// Groups use their name (or "Group"). Direct conversations list the
    /// other participants' display names.
    pub fn title(&self, me: &UserId) -> String {
        if self.is_group {
            return self.group_name.clone().unwrap_or_else(|| "Group".to_owned());
        }

        let others: Vec<&str> = self
            .participants
            .iter()
            .filter(|user| &user.id != me)
            .map(|user| user.name.as_str())
            .collect();

        if others.is_empty() { "Chat".to_owned() } else { others.join(", ") }
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MissingField` if the id is empty
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ProtocolError::MissingField("id"));
        }
        Ok(())
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, or a local temporary id while pending.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
    /// Creation time (server time once confirmed).
    pub created_at: Timestamp,
    /// Optimistic local entry awaiting server confirmation.
    #[serde(default)]
    pub pending: bool,
}

impl Message {
    /// Server-confirmed message.
    pub fn confirmed(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        sender_id: impl Into<UserId>,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            created_at,
            pending: false,
        }
    }

    /// Optimistic message with a local temporary id.
    pub fn optimistic(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        created_at: Timestamp,
    ) -> Self {
        Self { id, conversation_id, sender_id, content, created_at, pending: true }
    }

    /// Sort key: creation time, then id.
    pub fn order_key(&self) -> (Timestamp, &MessageId) {
        (self.created_at, &self.id)
    }

    /// Preview for the conversation list.
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MissingField` if id, conversation id, or sender id is
    ///   empty
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ProtocolError::MissingField("id"));
        }
        if self.conversation_id.is_empty() {
            return Err(ProtocolError::MissingField("conversationId"));
        }
        if self.sender_id.is_empty() {
            return Err(ProtocolError::MissingField("senderId"));
        }
        Ok(())
    }
}
