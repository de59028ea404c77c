//! Application layer for Parley
//!
//! The synchronization engine and a generic runtime, so the same coordination
//! code runs in production and in deterministic simulation.
//!
//! # Components
//!
//! - [`SyncEngine`]: coordinator state machine (events in, actions out)
//! - [`SyncConfig`]: timeouts and windows
//! - [`Driver`]: trait for platform-specific I/O
//! - [`Runtime`]: generic orchestration loop using a Driver

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
mod config;
mod driver;
mod engine;
mod event;
mod input;
mod notification;
mod runtime;

pub use action::SyncAction;
pub use config::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TYPING_IDLE, SyncConfig};
pub use driver::Driver;
pub use engine::SyncEngine;
pub use event::SyncEvent;
pub use input::{DriverInput, UserCommand};
pub use notification::StateChange;
pub use runtime::Runtime;
