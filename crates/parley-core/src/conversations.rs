//! Conversation list state.
//!
//! Holds every conversation summary the user can see, ordered most recently
//! active first. The store never fetches anything: when a message arrives for
//! a conversation it has not seen, it reports
//! [`IncomingOutcome::UnknownConversation`] and the caller fetches.
//!
//! # Invariants
//!
//! - Ordered by `updated_at` descending, ties broken by `id` ascending.
//! - Conversation ids are unique.
//! - `updated_at` never moves backwards through [`apply_incoming_message`].
//! - A message id counts toward unread at most once, as long as it is among
//!   the last [`APPLIED_IDS_PER_CONVERSATION`] ids applied to its conversation.
//!
//! [`apply_incoming_message`]: ConversationStore::apply_incoming_message

use std::{
    cmp::Ordering,
    collections::{HashMap, VecDeque},
};

use parley_proto::{Conversation, ConversationId, Message, MessageId};

use crate::error::StoreError;

/// Result of applying an incoming message to the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingOutcome {
    /// Conversation updated and re-ranked.
    Applied {
        /// Unread count after the update.
        unread_count: u32,
    },
    /// Message was already applied.
    Duplicate,
    /// Conversation is not known locally; the caller must fetch it.
    UnknownConversation,
}

/// Applied message ids remembered per conversation.
pub const APPLIED_IDS_PER_CONVERSATION: usize = 256;

/// Ordered collection of conversation summaries.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    /// Recently applied message ids, oldest first.
    applied: HashMap<ConversationId, VecDeque<MessageId>>,
}

fn recency(a: &Conversation, b: &Conversation) -> Ordering {
    b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id))
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection with a snapshot.
    ///
    /// Later duplicates of an id replace earlier ones.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if any conversation has an empty id; the
    ///   store is left unchanged
    pub fn load_snapshot(&mut self, snapshot: Vec<Conversation>) -> Result<(), StoreError> {
        for conversation in &snapshot {
            conversation.validate()?;
        }

        let mut conversations: Vec<Conversation> = Vec::with_capacity(snapshot.len());
        for conversation in snapshot {
            match conversations.iter_mut().find(|c| c.id == conversation.id) {
                Some(existing) => *existing = conversation,
                None => conversations.push(conversation),
            }
        }

        conversations.sort_by(recency);
        self.applied.retain(|id, _| conversations.iter().any(|c| &c.id == id));
        for conversation in &conversations {
            if let Some(last) = &conversation.last_message {
                record_applied(&mut self.applied, &conversation.id, &last.id);
            }
        }
        self.conversations = conversations;
        Ok(())
    }

    /// Apply a new message to its conversation.
    ///
    /// Updates the preview and recency, increments the unread counter unless
    /// the conversation is `active`, and re-ranks the list. A message older
    /// than the current preview still counts as unread but does not replace
    /// the preview.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if the message is missing required fields
    pub fn apply_incoming_message(
        &mut self,
        message: &Message,
        active: Option<&ConversationId>,
    ) -> Result<IncomingOutcome, StoreError> {
        message.validate()?;

        let Some(conversation) =
            self.conversations.iter_mut().find(|c| c.id == message.conversation_id)
        else {
            return Ok(IncomingOutcome::UnknownConversation);
        };

        let already_applied =
            self.applied.get(&conversation.id).is_some_and(|ids| ids.contains(&message.id));
        if already_applied || conversation.last_message.as_ref().is_some_and(|last| last.id == message.id) {
            return Ok(IncomingOutcome::Duplicate);
        }
        record_applied(&mut self.applied, &conversation.id, &message.id);

        let newer_than_preview = conversation
            .last_message
            .as_ref()
            .is_none_or(|last| message.created_at >= last.created_at);
        if newer_than_preview {
            conversation.last_message = Some(message.summary());
        }
        conversation.updated_at = conversation.updated_at.max(message.created_at);

        if active != Some(&conversation.id) {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        let unread_count = conversation.unread_count;

        self.conversations.sort_by(recency);
        Ok(IncomingOutcome::Applied { unread_count })
    }

    /// Reset a conversation's unread counter. Idempotent.
    ///
    /// Returns `true` if the counter changed.
    pub fn mark_read(&mut self, id: &ConversationId) -> bool {
        match self.conversations.iter_mut().find(|c| &c.id == id) {
            Some(conversation) if conversation.unread_count > 0 => {
                conversation.unread_count = 0;
                true
            },
            _ => false,
        }
    }

    /// Insert or replace a conversation by id.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if the conversation has an empty id
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> Result<(), StoreError> {
        conversation.validate()?;

        if let Some(last) = &conversation.last_message {
            record_applied(&mut self.applied, &conversation.id, &last.id);
        }
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.conversations.sort_by(recency);
        Ok(())
    }

    /// Conversations, most recently active first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Conversation by id.
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Rank of a conversation in the list (0 is the top).
    pub fn position(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| &c.id == id)
    }

    /// Unread counter of a conversation.
    pub fn unread_count(&self, id: &ConversationId) -> Option<u32> {
        self.get(id).map(|c| c.unread_count)
    }

    /// Sum of all unread counters.
    pub fn total_unread(&self) -> u64 {
        self.conversations.iter().map(|c| u64::from(c.unread_count)).sum()
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// True if there are no conversations.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

fn record_applied(
    applied: &mut HashMap<ConversationId, VecDeque<MessageId>>,
    conversation: &ConversationId,
    message: &MessageId,
) {
    let ids = applied.entry(conversation.clone()).or_default();
    if ids.contains(message) {
        return;
    }
    if ids.len() == APPLIED_IDS_PER_CONVERSATION {
        ids.pop_front();
    }
    ids.push_back(message.clone());
}
