//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` plays one client against a [`SharedSimServer`]. It implements
//! [`Driver`] so the same [`parley_app::Runtime`] orchestration code runs in
//! both production and simulation. User input comes from a script; requests
//! are served synchronously and their completions queued as input.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::VecDeque,
    sync::{MutexGuard, PoisonError},
    time::Duration,
};

use parley_app::{Driver, DriverInput, StateChange, SyncAction, SyncEngine, SyncEvent, UserCommand};
use parley_core::{Environment, SessionCredentials};
use parley_proto::{ChannelFrame, Timestamp, UserId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    SimEnv,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
    sim_server::{SharedSimServer, SimServer, SimServerError},
};

/// Error type for the simulation driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimDriverError {
    /// Another client panicked while holding the server lock.
    #[error("server lock poisoned")]
    Poisoned,
    /// The server rejected an emitted frame.
    #[error(transparent)]
    Server(#[from] SimServerError),
    /// A registered invariant failed after a state change.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl<T> From<PoisonError<T>> for SimDriverError {
    fn from(_: PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

/// One scripted step of simulated user activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Issue a user command.
    Command(UserCommand),
    /// Let time pass, then run periodic maintenance.
    Advance(Duration),
    /// Sever the channel from the server side.
    DropChannel,
}

/// Simulation driver for deterministic testing.
///
/// Generic over the clock so the CLI demo can run on wall-clock time while
/// tests use a [`SimEnv`].
pub struct SimDriver<E: Environment = SimEnv> {
    server: SharedSimServer,
    user: UserId,
    env: E,
    script: VecDeque<ScriptStep>,
    completions: VecDeque<SyncEvent>,
    channel_open: bool,
    notifications: Vec<StateChange>,
    emitted: Vec<ChannelFrame>,
    invariants: Option<InvariantRegistry>,
    stopped: bool,
}

impl<E: Environment> SimDriver<E> {
    /// Create a driver for `user` on `server`.
    pub fn new(server: SharedSimServer, user: impl Into<UserId>, env: E) -> Self {
        Self {
            server,
            user: user.into(),
            env,
            script: VecDeque::new(),
            completions: VecDeque::new(),
            channel_open: false,
            notifications: Vec::new(),
            emitted: Vec::new(),
            invariants: None,
            stopped: false,
        }
    }

    /// Enable invariant checking after every state change.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Replace the remaining script.
    #[must_use]
    pub fn with_script(mut self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.script = steps.into_iter().collect();
        self
    }

    /// Append a step to the script.
    pub fn push_step(&mut self, step: ScriptStep) {
        self.script.push_back(step);
    }

    /// Append a user command to the script.
    pub fn push_command(&mut self, command: UserCommand) {
        self.push_step(ScriptStep::Command(command));
    }

    /// User this driver plays.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// State changes delivered so far, oldest first.
    pub fn notifications(&self) -> &[StateChange] {
        &self.notifications
    }

    /// Take the delivered state changes.
    pub fn take_notifications(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.notifications)
    }

    /// Frames this client emitted on the channel.
    pub fn emitted(&self) -> &[ChannelFrame] {
        &self.emitted
    }

    /// True while the simulated channel is open.
    pub fn is_channel_open(&self) -> bool {
        self.channel_open
    }

    /// True once the runtime has stopped the driver.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn server(&self) -> Result<MutexGuard<'_, SimServer>, SimDriverError> {
        Ok(self.server.lock()?)
    }

    /// Inbound frame or request completion, if one is ready.
    fn ready_input(&mut self) -> Result<Option<DriverInput>, SimDriverError> {
        if self.channel_open
            && let Some(frame) = self.server()?.pop_frame(&self.user)
        {
            return Ok(Some(DriverInput::Event(SyncEvent::ChannelFrame(frame))));
        }
        Ok(self.completions.pop_front().map(DriverInput::Event))
    }

    fn drop_channel(&mut self) -> Result<Option<DriverInput>, SimDriverError> {
        if !self.channel_open {
            return Ok(None);
        }
        self.server()?.disconnect(&self.user);
        self.channel_open = false;
        debug!(user = %self.user, "channel dropped");
        Ok(Some(DriverInput::Event(SyncEvent::ChannelClosed { reason: "connection lost".into() })))
    }
}

impl<E: Environment> Driver for SimDriver<E> {
    type Error = SimDriverError;

    fn now(&self) -> Timestamp {
        self.env.now()
    }

    async fn next_input(&mut self) -> Result<Option<DriverInput>, Self::Error> {
        if let Some(input) = self.ready_input()? {
            return Ok(Some(input));
        }

        match self.script.pop_front() {
            Some(ScriptStep::Command(command)) => Ok(Some(DriverInput::Command(command))),
            Some(ScriptStep::Advance(duration)) => {
                self.env.sleep(duration).await;
                Ok(None)
            },
            Some(ScriptStep::DropChannel) => self.drop_channel(),
            None => Ok(Some(DriverInput::Command(UserCommand::Quit))),
        }
    }

    async fn request(&mut self, action: SyncAction) -> Result<(), Self::Error> {
        let now = self.env.now();
        let completion = self.server()?.serve(&self.user, action, now);
        self.completions.extend(completion);
        Ok(())
    }

    fn open_channel(&mut self, _credentials: SessionCredentials) {
        let outcome = self.server.lock().map_err(SimDriverError::from).and_then(|mut server| {
            server.connect(&self.user).map_err(SimDriverError::from)
        });

        let event = match outcome {
            Ok(()) => {
                self.channel_open = true;
                SyncEvent::ChannelOpened
            },
            Err(err) => SyncEvent::ChannelClosed { reason: err.to_string() },
        };
        self.completions.push_back(event);
    }

    async fn emit(&mut self, frame: ChannelFrame) -> Result<(), Self::Error> {
        if !self.channel_open {
            warn!(user = %self.user, event = %frame.name, "emit on closed channel");
            return Ok(());
        }
        self.server()?.handle_client_frame(&self.user, &frame)?;
        self.emitted.push(frame);
        Ok(())
    }

    fn close_channel(&mut self) {
        if let Ok(mut server) = self.server.lock() {
            server.disconnect(&self.user);
        }
        self.channel_open = false;
    }

    fn notify(&mut self, change: &StateChange, engine: &SyncEngine) -> Result<(), Self::Error> {
        self.notifications.push(change.clone());

        if let Some(registry) = &self.invariants {
            let snapshot = SystemSnapshot::single(ClientSnapshot::from_engine(engine));
            if let Err(violations) = registry.check_all(&snapshot) {
                let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
                return Err(SimDriverError::Invariant(messages.join("; ")));
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
