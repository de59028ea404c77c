//! Message timeline of the active conversation.
//!
//! Messages reach the client three ways: snapshot fetches, optimistic local
//! sends, and push events. Arrival order across those paths is not
//! guaranteed, so the store reconciles by id and by an echo rule rather than
//! trusting delivery order.
//!
//! # Echo Rule
//!
//! A confirmed message is the echo of a pending entry if both have the same
//! conversation, sender, and content, and their timestamps are within the
//! echo tolerance. The earliest matching pending entry is replaced.
//!
//! # Invariants
//!
//! - Ordered by `(created_at, id)`.
//! - No two entries share an id.
//! - Every entry belongs to the scoped conversation.

use std::{collections::HashSet, time::Duration};

use parley_proto::{ConversationId, Message, MessageId, ProtocolError};
use tracing::debug;

use crate::error::StoreError;

/// Default window for matching an optimistic send to its server echo.
pub const DEFAULT_ECHO_TOLERANCE: Duration = Duration::from_secs(10);

/// Result of reconciling a confirmed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Inserted at its sorted position.
    Inserted,
    /// Replaced the pending entry with this temporary id.
    Replaced {
        /// Temporary id of the replaced entry.
        temp_id: MessageId,
    },
    /// Already stored; nothing changed.
    Duplicate,
    /// Belongs to another conversation; nothing changed.
    OtherConversation,
}

impl ReconcileOutcome {
    /// True if the store content changed.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced { .. })
    }
}

/// Ordered, de-duplicated messages of a single conversation.
#[derive(Debug, Clone)]
pub struct MessageStore {
    conversation_id: Option<ConversationId>,
    messages: Vec<Message>,
    echo_tolerance: Duration,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_TOLERANCE)
    }
}

impl MessageStore {
    /// Create an unscoped store.
    pub fn new(echo_tolerance: Duration) -> Self {
        Self { conversation_id: None, messages: Vec::new(), echo_tolerance }
    }

    /// Conversation the store is scoped to.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Number of messages awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.pending).count()
    }

    /// Timestamp of the last message.
    pub fn last_timestamp(&self) -> Option<parley_proto::Timestamp> {
        self.messages.last().map(|m| m.created_at)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all content and rescope.
    pub fn reset(&mut self, conversation_id: Option<ConversationId>) {
        self.conversation_id = conversation_id;
        self.messages.clear();
    }

    /// Replace content with a snapshot of confirmed messages.
    ///
    /// Pending entries for the same conversation survive unless the snapshot
    /// already contains their echo. Confirmed entries missing from the
    /// snapshot survive if they are no older than its newest message. Duplicate
    /// ids keep the earliest entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if a message is missing required fields
    /// - `StoreError::WrongConversation` if a message belongs elsewhere
    pub fn load_snapshot(
        &mut self,
        conversation_id: ConversationId,
        snapshot: Vec<Message>,
    ) -> Result<(), StoreError> {
        if conversation_id.is_empty() {
            return Err(ProtocolError::MissingField("conversationId").into());
        }
        for message in &snapshot {
            message.validate()?;
            if message.conversation_id != conversation_id {
                return Err(StoreError::WrongConversation {
                    expected: conversation_id,
                    got: message.conversation_id.clone(),
                });
            }
        }

        let mut confirmed: Vec<Message> =
            snapshot.into_iter().map(|m| Message { pending: false, ..m }).collect();
        confirmed.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        let mut seen = HashSet::new();
        confirmed.retain(|m| seen.insert(m.id.clone()));

        let newest = confirmed.last().map(|m| m.created_at);
        let tolerance = self.echo_tolerance;
        let survivors: Vec<Message> = if self.conversation_id.as_ref() == Some(&conversation_id) {
            std::mem::take(&mut self.messages)
                .into_iter()
                .filter(|m| !seen.contains(&m.id))
                .filter(|m| {
                    if m.pending {
                        !confirmed.iter().any(|c| is_echo(c, m, tolerance))
                    } else {
                        // Pushed after the server built the snapshot
                        newest.is_none_or(|newest| m.created_at >= newest)
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        self.conversation_id = Some(conversation_id);
        self.messages = confirmed;
        for pending in survivors {
            self.insert_sorted(pending);
        }
        Ok(())
    }

    /// Append a locally created pending message.
    ///
    /// The caller assigns a timestamp later than every stored entry; an
    /// earlier one is still placed at its sorted position.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if the message is missing required fields
    /// - `StoreError::NotPending` if the message is not marked pending
    /// - `StoreError::NoConversation` / `WrongConversation` on scope mismatch
    /// - `StoreError::DuplicateId` if the id is already stored
    pub fn append_optimistic(&mut self, message: Message) -> Result<(), StoreError> {
        message.validate()?;
        if !message.pending {
            return Err(StoreError::NotPending(message.id));
        }
        self.check_scope(&message.conversation_id)?;
        if self.get(&message.id).is_some() {
            return Err(StoreError::DuplicateId(message.id));
        }

        self.insert_sorted(message);
        Ok(())
    }

    /// Merge a confirmed message delivered by push or fetch.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if the message is missing required fields
    pub fn reconcile_incoming(&mut self, message: Message) -> Result<ReconcileOutcome, StoreError> {
        message.validate()?;
        let message = Message { pending: false, ..message };

        if self.conversation_id.as_ref() != Some(&message.conversation_id) {
            return Ok(ReconcileOutcome::OtherConversation);
        }
        if self.get(&message.id).is_some() {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let echo_of = self.messages.iter().position(|m| m.pending && is_echo(&message, m, self.echo_tolerance));
        match echo_of {
            Some(index) => {
                let temp_id = self.messages.remove(index).id;
                debug!(%temp_id, id = %message.id, "pending message confirmed by echo");
                self.insert_sorted(message);
                Ok(ReconcileOutcome::Replaced { temp_id })
            },
            None => {
                self.insert_sorted(message);
                Ok(ReconcileOutcome::Inserted)
            },
        }
    }

    /// Confirm a pending entry with the durable send response.
    ///
    /// Whichever of response and push echo arrives first wins; the other
    /// becomes a no-op, so one send always ends as exactly one message.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` if the message is missing required fields
    pub fn confirm_pending(
        &mut self,
        temp_id: &MessageId,
        message: Message,
    ) -> Result<ReconcileOutcome, StoreError> {
        message.validate()?;
        let message = Message { pending: false, ..message };

        if self.conversation_id.as_ref() != Some(&message.conversation_id) {
            return Ok(ReconcileOutcome::OtherConversation);
        }

        let temp_index = self.messages.iter().position(|m| m.pending && &m.id == temp_id);

        if self.get(&message.id).is_some() {
            if let Some(index) = temp_index {
                debug!(%temp_id, id = %message.id, "dropping pending entry already confirmed");
                self.messages.remove(index);
            }
            return Ok(ReconcileOutcome::Duplicate);
        }

        match temp_index {
            Some(index) => {
                self.messages.remove(index);
                self.insert_sorted(message);
                Ok(ReconcileOutcome::Replaced { temp_id: temp_id.clone() })
            },
            None => self.reconcile_incoming(message),
        }
    }

    /// Remove a pending entry whose send failed.
    pub fn discard_pending(&mut self, temp_id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.pending && &m.id == temp_id)?;
        Some(self.messages.remove(index))
    }

    fn check_scope(&self, conversation_id: &ConversationId) -> Result<(), StoreError> {
        match &self.conversation_id {
            None => Err(StoreError::NoConversation),
            Some(expected) if expected != conversation_id => Err(StoreError::WrongConversation {
                expected: expected.clone(),
                got: conversation_id.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn insert_sorted(&mut self, message: Message) {
        let index = self.messages.partition_point(|m| m.order_key() < message.order_key());
        self.messages.insert(index, message);
    }
}

fn is_echo(confirmed: &Message, pending: &Message, tolerance: Duration) -> bool {
    pending.conversation_id == confirmed.conversation_id
        && pending.sender_id == confirmed.sender_id
        && pending.content == confirmed.content
        && pending.created_at.abs_diff(confirmed.created_at) <= tolerance
}
