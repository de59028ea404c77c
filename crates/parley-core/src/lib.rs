//! Parley core
//!
//! Sans-IO building blocks of the client synchronization engine. Every
//! component is a pure state machine: time is passed in, and anything that
//! needs I/O is returned as an action for the caller to execute.
//!
//! # Components
//!
//! - [`TypingTracker`]: per-conversation typing state with expiry
//! - [`RealtimeChannel`]: connection lifecycle, room membership, emission, and
//!   inbound dispatch
//! - [`ConversationStore`]: conversation list ordered by recency
//! - [`MessageStore`]: ordered, de-duplicated messages of the active
//!   conversation
//! - [`Environment`]: clock abstraction for production and simulation

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod conversations;
pub mod env;
pub mod error;
pub mod messages;
pub mod typing;

pub use channel::{ChannelAction, ChannelConfig, ChannelState, RealtimeChannel, SessionCredentials};
pub use conversations::{ConversationStore, IncomingOutcome};
pub use env::{Environment, Instant, SystemEnv};
pub use error::{ChannelError, StoreError, SyncError};
pub use messages::{MessageStore, ReconcileOutcome};
pub use typing::TypingTracker;
