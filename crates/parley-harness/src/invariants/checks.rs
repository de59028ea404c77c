//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Conversation list is ordered most recently updated first, ties by id.
pub struct ConversationOrder;

impl Invariant for ConversationOrder {
    fn name(&self) -> &'static str {
        "conversation_order"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for pair in client.conversations.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let ordered = a.updated_at > b.updated_at || (a.updated_at == b.updated_at && a.id < b.id);
                if !ordered {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: {} ({}) listed before {} ({})",
                            client.user, a.id, a.updated_at, b.id, b.updated_at
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// No two messages in a view, and no two conversations in a list, share an
/// id.
pub struct UniqueIds;

impl Invariant for UniqueIds {
    fn name(&self) -> &'static str {
        "unique_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let mut messages = HashSet::new();
            if let Some(dup) = client.messages.iter().find(|m| !messages.insert(&m.id)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: message {} appears twice", client.user, dup.id),
                });
            }

            let mut conversations = HashSet::new();
            if let Some(dup) = client.conversations.iter().find(|c| !conversations.insert(&c.id)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: conversation {} appears twice", client.user, dup.id),
                });
            }
        }
        Ok(())
    }
}

/// Messages are strictly ordered by creation time, then id.
pub struct MessageOrdering;

impl Invariant for MessageOrdering {
    fn name(&self) -> &'static str {
        "message_ordering"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for pair in client.messages.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                if (a.created_at, &a.id) >= (b.created_at, &b.id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: {}@{} listed before {}@{}",
                            client.user, a.id, a.created_at, b.id, b.created_at
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The message view only ever holds the selected conversation.
pub struct MessagesScopedToActive;

impl Invariant for MessagesScopedToActive {
    fn name(&self) -> &'static str {
        "messages_scoped_to_active"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.message_scope != client.active {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: view scoped to {:?} while {:?} is active",
                        client.user, client.message_scope, client.active
                    ),
                });
            }
            if let Some(stray) =
                client.messages.iter().find(|m| Some(&m.conversation_id) != client.active.as_ref())
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: message {} of {} shown in {:?}",
                        client.user, stray.id, stray.conversation_id, client.active
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The selected conversation has no unread messages.
pub struct ActiveConversationRead;

impl Invariant for ActiveConversationRead {
    fn name(&self) -> &'static str {
        "active_conversation_read"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(active) = &client.active else {
                continue;
            };
            if let Some(row) = client.conversations.iter().find(|c| &c.id == active)
                && row.unread > 0
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: active {} has {} unread", client.user, active, row.unread),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::{ConversationId, MessageId, Timestamp, UserId};

    use super::*;
    use crate::invariants::{ClientSnapshot, ConversationRow, MessageRow};

    fn row(id: &str, updated: u64, unread: u32) -> ConversationRow {
        ConversationRow {
            id: ConversationId::from(id),
            updated_at: Timestamp::from_millis(updated),
            unread,
            last_message: None,
        }
    }

    fn message(id: &str, conv: &str, at: u64) -> MessageRow {
        MessageRow {
            id: MessageId::from(id),
            conversation_id: ConversationId::from(conv),
            created_at: Timestamp::from_millis(at),
            pending: false,
        }
    }

    fn client() -> ClientSnapshot {
        ClientSnapshot { user: UserId::from("me"), ..ClientSnapshot::default() }
    }

    #[test]
    fn conversation_order_detects_inversion() {
        let mut snapshot = client();
        snapshot.conversations = vec![row("a", 10, 0), row("b", 20, 0)];

        let err = ConversationOrder.check(&SystemSnapshot::single(snapshot)).unwrap_err();
        assert_eq!(err.invariant, "conversation_order");
    }

    #[test]
    fn conversation_order_accepts_id_tiebreak() {
        let mut snapshot = client();
        snapshot.conversations = vec![row("a", 10, 0), row("b", 10, 0)];

        assert!(ConversationOrder.check(&SystemSnapshot::single(snapshot)).is_ok());
    }

    #[test]
    fn duplicate_message_is_detected() {
        let mut snapshot = client();
        snapshot.active = Some(ConversationId::from("c1"));
        snapshot.messages = vec![message("m1", "c1", 1), message("m1", "c1", 2)];

        assert!(UniqueIds.check(&SystemSnapshot::single(snapshot)).is_err());
    }

    #[test]
    fn message_ordering_rejects_equal_keys() {
        let mut snapshot = client();
        snapshot.messages = vec![message("m2", "c1", 5), message("m1", "c1", 5)];

        assert!(MessageOrdering.check(&SystemSnapshot::single(snapshot)).is_err());
    }

    #[test]
    fn stray_message_is_detected() {
        let mut snapshot = client();
        snapshot.active = Some(ConversationId::from("c1"));
        snapshot.message_scope = Some(ConversationId::from("c1"));
        snapshot.messages = vec![message("m1", "c2", 1)];

        assert!(MessagesScopedToActive.check(&SystemSnapshot::single(snapshot)).is_err());
    }

    #[test]
    fn unread_active_conversation_is_detected() {
        let mut snapshot = client();
        snapshot.active = Some(ConversationId::from("a"));
        snapshot.conversations = vec![row("a", 10, 2)];

        assert!(ActiveConversationRead.check(&SystemSnapshot::single(snapshot)).is_err());
    }
}
