//! Deterministic simulation harness for Parley sync testing.
//!
//! In-memory implementations of the server, the clock, and the driver so
//! engine behavior under message races, reconnects, and typing expiry is
//! reproducible.
//!
//! # Single client
//!
//! [`SimDriver`] implements [`parley_app::Driver`] against a shared
//! [`SimServer`], so tests run the production [`parley_app::Runtime`] loop
//! from a script of user commands.
//!
//! # Several clients
//!
//! [`SimCluster`] drives many engines synchronously against one server and
//! decides exactly when each client observes pushed events.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties every client must uphold after
//! each delivered input. Use [`InvariantRegistry::standard()`] for the store
//! guarantees.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;

pub use cluster::{ClientIndex, SimClient, SimCluster};
pub use invariants::{
    ActiveConversationRead, ClientSnapshot, ConversationOrder, ConversationRow, Invariant, InvariantRegistry,
    InvariantResult, MessageOrdering, MessageRow, MessagesScopedToActive, SystemSnapshot, UniqueIds, Violation,
};
pub use sim_driver::{ScriptStep, SimDriver, SimDriverError};
pub use sim_env::SimEnv;
pub use sim_server::{SharedSimServer, SimServer, SimServerError, create_shared_server};
