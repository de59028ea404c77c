//! Client-side guarantees checked after every simulated delivery.
//!
//! Each check reads a [`SystemSnapshot`] captured from the
//! [`parley_app::SyncEngine`]s under test, so a failure points at the exact
//! delivery that broke the conversation list or the message view.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::single(ClientSnapshot::from_engine(&engine));
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ActiveConversationRead, ConversationOrder, MessageOrdering, MessagesScopedToActive, UniqueIds,
};
pub use snapshot::{ClientSnapshot, ConversationRow, MessageRow, SystemSnapshot};

/// Outcome of a single check.
pub type InvariantResult = Result<(), Violation>;

/// A broken guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Check that failed.
    pub invariant: &'static str,
    /// Offending client and record.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A guarantee over every client in a snapshot.
pub trait Invariant: Send + Sync {
    /// Stable name used in violation reports.
    fn name(&self) -> &'static str;

    /// Inspect `state`, reporting the first offending record.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Ordered set of checks run together.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvariantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.invariants.iter().map(|i| i.name()).collect();
        f.debug_struct("InvariantRegistry").field("invariants", &names).finish()
    }
}

impl InvariantRegistry {
    /// Registry without checks.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Every guarantee a synchronized client upholds:
    ///
    /// - [`ConversationOrder`]: list sorted by recency, ties by id
    /// - [`UniqueIds`]: no duplicate messages or conversations
    /// - [`MessageOrdering`]: view sorted by creation time, ties by id
    /// - [`MessagesScopedToActive`]: view holds only the active conversation
    /// - [`ActiveConversationRead`]: active conversation has no unread
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ConversationOrder);
        registry.add(UniqueIds);
        registry.add(MessageOrdering);
        registry.add(MessagesScopedToActive);
        registry.add(ActiveConversationRead);
        registry
    }

    /// Register another check.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Run every check, collecting all violations.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        for invariant in &self.invariants {
            if let Err(violation) = invariant.check(state) {
                violations.push(violation);
            }
        }
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Run every check and panic listing the violations, prefixed with
    /// `context`.
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        let Err(violations) = self.check_all(state) else {
            return;
        };
        let report = violations.iter().map(|v| format!("\n  {v}")).collect::<String>();
        panic!("Invariant violation {context}:{report}");
    }

    /// Registered check count.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Whether no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
