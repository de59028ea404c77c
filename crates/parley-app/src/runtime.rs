//! Generic runtime for engine orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`SyncEngine`]: synchronization state machine
//! - [`Driver`]: platform-specific I/O

use crate::{Driver, DriverInput, SyncAction, SyncEngine, UserCommand};

/// Generic runtime that orchestrates the engine and a driver.
pub struct Runtime<D: Driver> {
    driver: D,
    engine: SyncEngine,
}

impl<D: Driver> Runtime<D> {
    /// Create a runtime.
    pub fn new(driver: D, engine: SyncEngine) -> Self {
        Self { driver, engine }
    }

    /// Run the event loop until the user quits or the driver runs dry.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver encounters an I/O error.
    pub async fn run(&mut self) -> Result<(), D::Error> {
        let now = self.driver.now();
        let actions = self.engine.start(now);
        self.execute(actions).await?;

        loop {
            if self.process_cycle().await? {
                break;
            }
        }

        let actions = self.engine.shutdown();
        self.execute(actions).await?;
        self.driver.stop();
        Ok(())
    }

    /// Process one input.
    ///
    /// Returns `true` if the session should end.
    async fn process_cycle(&mut self) -> Result<bool, D::Error> {
        let input = self.driver.next_input().await?;
        let now = self.driver.now();

        let actions = match input {
            Some(DriverInput::Command(UserCommand::Quit)) => return Ok(true),
            Some(DriverInput::Command(command)) => self.engine.apply_command(command, now),
            Some(DriverInput::Event(event)) => self.engine.handle(event, now),
            None => self.engine.tick(now),
        };

        self.execute(actions).await?;
        Ok(false)
    }

    /// Hand actions to the driver.
    async fn execute(&mut self, actions: Vec<SyncAction>) -> Result<(), D::Error> {
        for action in actions {
            match action {
                SyncAction::Notify(change) => self.driver.notify(&change, &self.engine)?,
                SyncAction::OpenChannel { credentials } => self.driver.open_channel(credentials),
                SyncAction::Emit(frame) => self.driver.emit(frame).await?,
                SyncAction::CloseChannel => self.driver.close_channel(),
                request @ (SyncAction::FetchConversations
                | SyncAction::FetchMessages { .. }
                | SyncAction::PostMessage { .. }
                | SyncAction::CreateConversation { .. }
                | SyncAction::SearchUsers { .. }) => self.driver.request(request).await?,
            }
        }
        Ok(())
    }

    /// Get a reference to the engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Get a mutable reference to the engine.
    pub fn engine_mut(&mut self) -> &mut SyncEngine {
        &mut self.engine
    }

    /// Get a reference to the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }
}
