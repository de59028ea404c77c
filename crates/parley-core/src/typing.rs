//! Typing indicator tracking.
//!
//! Remote "stopped typing" signals are unreliable: a peer may crash, lose its
//! connection, or simply never send one. Every entry therefore expires on its
//! own after a fixed inactivity window, and a periodic sweep removes expired
//! entries.
//!
//! # State Machine
//!
//! Per `(conversation, user)` pair:
//!
//! ```text
//! ┌────────┐  typing=true   ┌────────┐
//! │ Absent │───────────────>│ Typing │──┐ typing=true (refresh)
//! └────────┘<───────────────└────────┘<─┘
//!             typing=false
//!             or expiry
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    ops::Sub,
    time::Duration,
};

use parley_proto::{ConversationId, Timestamp, UserId};

/// Inactivity window after which a typing entry is considered stale.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Whether an entry last refreshed at `last_seen` has expired at `now`.
pub fn is_expired<I>(last_seen: I, now: I, window: Duration) -> bool
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    now >= last_seen && now - last_seen >= window
}

/// Per-conversation set of users currently typing.
///
/// Generic over the instant type so tests can drive it with any monotonic
/// clock.
#[derive(Debug, Clone)]
pub struct TypingTracker<I = Timestamp> {
    window: Duration,
    entries: HashMap<ConversationId, BTreeMap<UserId, I>>,
}

impl<I> Default for TypingTracker<I> {
    fn default() -> Self {
        Self { window: DEFAULT_TYPING_EXPIRY, entries: HashMap::new() }
    }
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a tracker with the given expiry window.
    pub fn new(window: Duration) -> Self {
        Self { window, entries: HashMap::new() }
    }

    /// Expiry window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a typing signal.
    ///
    /// `true` records or refreshes the entry, `false` removes it. Returns
    /// `true` if the pair changed between absent and typing.
    pub fn set_typing(
        &mut self,
        conversation: &ConversationId,
        user: &UserId,
        is_typing: bool,
        now: I,
    ) -> bool {
        let was_typing = self.is_typing(conversation, user, now);

        if is_typing {
            self.entries.entry(conversation.clone()).or_default().insert(user.clone(), now);
        } else if let Some(users) = self.entries.get_mut(conversation) {
            users.remove(user);
            if users.is_empty() {
                self.entries.remove(conversation);
            }
        }

        was_typing != is_typing
    }

    /// Whether `user` is typing in `conversation` at `now`.
    pub fn is_typing(&self, conversation: &ConversationId, user: &UserId, now: I) -> bool {
        self.entries
            .get(conversation)
            .and_then(|users| users.get(user))
            .is_some_and(|&seen| !is_expired(seen, now, self.window))
    }

    /// Whether anyone is typing in `conversation` at `now`.
    ///
    /// Expired entries count as not typing even before the sweep removes them.
    pub fn is_anyone_typing(&self, conversation: &ConversationId, now: I) -> bool {
        self.entries
            .get(conversation)
            .is_some_and(|users| users.values().any(|&seen| !is_expired(seen, now, self.window)))
    }

    /// Users typing in `conversation` at `now`, sorted by id.
    pub fn typing_users(&self, conversation: &ConversationId, now: I) -> Vec<UserId> {
        self.entries
            .get(conversation)
            .map(|users| {
                users
                    .iter()
                    .filter(|&(_, &seen)| !is_expired(seen, now, self.window))
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove expired entries.
    ///
    /// Returns the conversations that lost at least one entry, sorted.
    pub fn sweep_expired(&mut self, now: I) -> Vec<ConversationId> {
        let window = self.window;
        let mut changed = Vec::new();

        self.entries.retain(|conversation, users| {
            let before = users.len();
            users.retain(|_, seen| !is_expired(*seen, now, window));
            if users.len() != before {
                changed.push(conversation.clone());
            }
            !users.is_empty()
        });

        changed.sort();
        changed
    }

    /// Drop every entry for `conversation`. Returns `true` if any existed.
    pub fn clear_conversation(&mut self, conversation: &ConversationId) -> bool {
        self.entries.remove(conversation).is_some()
    }

    /// Number of tracked entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
