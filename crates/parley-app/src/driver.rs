//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from the transport. Each
//! platform implements it to provide HTTP calls, the realtime channel, and
//! observer delivery, while the generic [`crate::Runtime`] handles all
//! orchestration.

use std::future::Future;

use parley_core::SessionCredentials;
use parley_proto::{ChannelFrame, Timestamp};

use crate::{DriverInput, StateChange, SyncAction, SyncEngine};

/// Abstracts I/O operations for the runtime.
///
/// # Implementations
///
/// - **Simulation**: in-memory server with a virtual clock
///   (`parley-harness`)
/// - **Production**: HTTP client plus a websocket channel
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Current time.
    fn now(&self) -> Timestamp;

    /// Wait for the next input.
    ///
    /// Returns `None` when nothing is ready; the runtime then runs periodic
    /// maintenance.
    fn next_input(&mut self) -> impl Future<Output = Result<Option<DriverInput>, Self::Error>> + Send;

    /// Start a request/response call.
    ///
    /// Receives only actions for which [`SyncAction::is_request`] holds. The
    /// completion is reported later through [`Self::next_input`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be issued at all.
    fn request(&mut self, action: SyncAction) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Open the realtime channel. The outcome is reported as a
    /// [`crate::SyncEvent::ChannelOpened`] or
    /// [`crate::SyncEvent::ChannelClosed`].
    fn open_channel(&mut self, credentials: SessionCredentials);

    /// Send a frame over the realtime channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport failed.
    fn emit(&mut self, frame: ChannelFrame) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the realtime channel.
    fn close_channel(&mut self);

    /// Deliver a state change to observers.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    fn notify(&mut self, change: &StateChange, engine: &SyncEngine) -> Result<(), Self::Error>;

    /// Clean up resources.
    fn stop(&mut self);
}
