//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a client shows at a point in time. Invariants
//! operate on snapshots rather than live engines so a check sees one
//! consistent state.

use parley_app::SyncEngine;
use parley_proto::{ConversationId, MessageId, Timestamp, UserId};
use serde::Serialize;

/// Every simulated client, in cluster order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSnapshot {
    /// Indexed like the cluster's clients.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// No clients.
    pub fn empty() -> Self {
        Self::default()
    }

    /// One client, as captured by a single-engine driver.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Several clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }

    /// Append the next client.
    pub fn add_client(&mut self, client: ClientSnapshot) {
        self.clients.push(client);
    }
}

/// What one client currently shows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientSnapshot {
    /// Local user.
    pub user: UserId,
    /// Selected conversation.
    pub active: Option<ConversationId>,
    /// Conversation the message view is scoped to.
    pub message_scope: Option<ConversationId>,
    /// Conversation list in display order.
    pub conversations: Vec<ConversationRow>,
    /// Message view in display order.
    pub messages: Vec<MessageRow>,
}

impl ClientSnapshot {
    /// Capture the observable state of an engine.
    pub fn from_engine(engine: &SyncEngine) -> Self {
        Self {
            user: engine.user_id().clone(),
            active: engine.active_conversation().cloned(),
            message_scope: engine.messages().conversation_id().cloned(),
            conversations: engine
                .conversations()
                .conversations()
                .iter()
                .map(|c| ConversationRow {
                    id: c.id.clone(),
                    updated_at: c.updated_at,
                    unread: c.unread_count,
                    last_message: c.last_message.as_ref().map(|m| m.id.clone()),
                })
                .collect(),
            messages: engine
                .messages()
                .messages()
                .iter()
                .map(|m| MessageRow {
                    id: m.id.clone(),
                    conversation_id: m.conversation_id.clone(),
                    created_at: m.created_at,
                    pending: m.pending,
                })
                .collect(),
        }
    }
}

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRow {
    /// Conversation id.
    pub id: ConversationId,
    /// Latest activity.
    pub updated_at: Timestamp,
    /// Unread counter.
    pub unread: u32,
    /// Id of the previewed message.
    pub last_message: Option<MessageId>,
}

/// One row of the message view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRow {
    /// Message id.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Creation time.
    pub created_at: Timestamp,
    /// Awaiting confirmation.
    pub pending: bool,
}
