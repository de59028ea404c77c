//! Multi-client cluster simulation.
//!
//! Drives several [`SyncEngine`]s against one [`SimServer`] without an async
//! runtime. Every action is executed immediately; completions and pushed
//! frames queue per client until [`SimCluster::settle`] delivers them, so a
//! test controls exactly when each client observes the server.

use std::{collections::VecDeque, time::Duration};

use parley_app::{StateChange, SyncAction, SyncConfig, SyncEngine, SyncEvent, UserCommand};
use parley_core::{Environment, SessionCredentials};
use parley_proto::{Timestamp, UserId, UserRef};
use tracing::{trace, warn};

use crate::{
    SimEnv, SimServer,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
};

/// Upper bound on deliveries per [`SimCluster::settle`]. A cluster that does
/// not quiesce within it is livelocked.
const MAX_SETTLE_STEPS: usize = 10_000;

/// Index of a client in the cluster.
pub type ClientIndex = usize;

/// A simulated client and its pending inputs.
pub struct SimClient {
    engine: SyncEngine,
    completions: VecDeque<SyncEvent>,
    changes: Vec<StateChange>,
    channel_open: bool,
}

impl SimClient {
    /// The client's engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// State changes delivered so far.
    pub fn changes(&self) -> &[StateChange] {
        &self.changes
    }
}

/// Simulated cluster of clients sharing one server and one clock.
pub struct SimCluster {
    server: SimServer,
    env: SimEnv,
    clients: Vec<SimClient>,
    invariants: Option<InvariantRegistry>,
}

impl SimCluster {
    /// Create an empty cluster whose clock starts at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self { server: SimServer::new(), env: SimEnv::starting_at(start), clients: Vec::new(), invariants: None }
    }

    /// Check invariants after every delivered input.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Register a user and create an idle client for them.
    pub fn add_client(&mut self, user: UserRef, config: SyncConfig) -> ClientIndex {
        let engine = SyncEngine::new(config, user.id.clone(), SessionCredentials::bearer(format!("token-{}", user.id)));
        self.server.add_user(user);
        self.clients.push(SimClient { engine, completions: VecDeque::new(), changes: Vec::new(), channel_open: false });
        self.clients.len() - 1
    }

    /// Current virtual time.
    pub fn now(&self) -> Timestamp {
        self.env.now()
    }

    /// The shared server.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// Mutable access to the shared server, e.g. to seed conversations.
    pub fn server_mut(&mut self) -> &mut SimServer {
        &mut self.server
    }

    /// A client.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn client(&self, index: ClientIndex) -> &SimClient {
        &self.clients[index]
    }

    /// A client's engine.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn engine(&self, index: ClientIndex) -> &SyncEngine {
        &self.clients[index].engine
    }

    /// Take a client's delivered state changes.
    pub fn take_changes(&mut self, index: ClientIndex) -> Vec<StateChange> {
        std::mem::take(&mut self.clients[index].changes)
    }

    /// Start a client's engine and settle.
    pub fn start(&mut self, index: ClientIndex) {
        let now = self.now();
        let actions = self.clients[index].engine.start(now);
        self.execute(index, actions);
        self.settle();
    }

    /// Start every client's engine and settle.
    pub fn start_all(&mut self) {
        for index in 0..self.clients.len() {
            self.start(index);
        }
    }

    /// Apply a user command on a client without delivering the results.
    pub fn command(&mut self, index: ClientIndex, command: UserCommand) {
        let now = self.now();
        let actions = self.clients[index].engine.apply_command(command, now);
        self.execute(index, actions);
    }

    /// Apply a user command on a client and settle.
    pub fn command_and_settle(&mut self, index: ClientIndex, command: UserCommand) {
        self.command(index, command);
        self.settle();
    }

    /// Deliver one pending input to one client.
    ///
    /// Pushed frames are delivered before request completions. Returns `false`
    /// if the client had nothing pending.
    pub fn deliver_one(&mut self, index: ClientIndex) -> bool {
        let event = self.next_pending(index);
        let Some(event) = event else {
            return false;
        };
        self.deliver(index, event);
        true
    }

    /// Deliver pending inputs round-robin until every client is idle.
    ///
    /// Returns the number of deliveries.
    ///
    /// # Panics
    ///
    /// Panics if the cluster does not quiesce.
    pub fn settle(&mut self) -> usize {
        let mut steps = 0;
        loop {
            let mut progressed = false;
            for index in 0..self.clients.len() {
                progressed |= self.deliver_one(index);
            }
            if !progressed {
                return steps;
            }
            steps += 1;
            assert!(steps < MAX_SETTLE_STEPS, "cluster did not quiesce");
        }
    }

    /// Let time pass, tick every client, and settle.
    pub fn advance(&mut self, duration: Duration) {
        let now = self.env.advance(duration);
        for index in 0..self.clients.len() {
            let actions = self.clients[index].engine.tick(now);
            self.execute(index, actions);
        }
        self.settle();
    }

    /// Sever a client's channel from the server side and report it.
    pub fn drop_channel(&mut self, index: ClientIndex) {
        let user = self.user(index);
        self.server.disconnect(&user);
        if std::mem::take(&mut self.clients[index].channel_open) {
            self.deliver(index, SyncEvent::ChannelClosed { reason: "connection lost".into() });
        }
    }

    /// Snapshot of every client.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_clients(self.clients.iter().map(|c| ClientSnapshot::from_engine(&c.engine)).collect())
    }

    fn user(&self, index: ClientIndex) -> UserId {
        self.clients[index].engine.user_id().clone()
    }

    fn next_pending(&mut self, index: ClientIndex) -> Option<SyncEvent> {
        let user = self.user(index);
        let client = &mut self.clients[index];
        if client.channel_open
            && let Some(frame) = self.server.pop_frame(&user)
        {
            return Some(SyncEvent::ChannelFrame(frame));
        }
        client.completions.pop_front()
    }

    fn deliver(&mut self, index: ClientIndex, event: SyncEvent) {
        trace!(client = index, ?event, "deliver");
        let now = self.now();
        let actions = self.clients[index].engine.handle(event, now);
        self.execute(index, actions);

        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.snapshot(), &format!("after delivery to client {index}"));
        }
    }

    fn execute(&mut self, index: ClientIndex, actions: Vec<SyncAction>) {
        let user = self.user(index);
        let now = self.now();

        for action in actions {
            match action {
                SyncAction::Notify(change) => self.clients[index].changes.push(change),
                SyncAction::OpenChannel { .. } => {
                    let event = match self.server.connect(&user) {
                        Ok(()) => {
                            self.clients[index].channel_open = true;
                            SyncEvent::ChannelOpened
                        },
                        Err(err) => SyncEvent::ChannelClosed { reason: err.to_string() },
                    };
                    self.clients[index].completions.push_back(event);
                },
                SyncAction::Emit(frame) => {
                    if !self.clients[index].channel_open {
                        continue;
                    }
                    if let Err(err) = self.server.handle_client_frame(&user, &frame) {
                        warn!(client = index, %err, "server rejected frame");
                    }
                },
                SyncAction::CloseChannel => {
                    self.server.disconnect(&user);
                    self.clients[index].channel_open = false;
                },
                request => {
                    let completion = self.server.serve(&user, request, now);
                    self.clients[index].completions.extend(completion);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::ChannelState;

    use super::*;

    fn cluster() -> (SimCluster, ClientIndex, ClientIndex) {
        let mut cluster = SimCluster::new(Timestamp::from_millis(1_000));
        let alice = cluster.add_client(UserRef::new("alice", "alice", "Alice"), SyncConfig::default());
        let bob = cluster.add_client(UserRef::new("bob", "bob", "Bob"), SyncConfig::default());
        (cluster, alice, bob)
    }

    #[test]
    fn start_connects_and_loads() {
        let (mut cluster, alice, _) = cluster();
        cluster.server_mut().create_group("team", &[UserId::from("alice"), UserId::from("bob")], Timestamp::from_millis(10)).unwrap();

        cluster.start(alice);

        assert_eq!(cluster.engine(alice).conversations().len(), 1);
        assert!(cluster.server().is_connected(&UserId::from("alice")));
    }

    #[test]
    fn late_client_starts_on_cluster_clock() {
        let (mut cluster, alice, _) = cluster();
        cluster.start(alice);
        cluster.advance(Duration::from_secs(5));

        let carol = cluster.add_client(UserRef::new("carol", "carol", "Carol"), SyncConfig::default());
        cluster.start(carol);

        assert_eq!(cluster.now(), Timestamp::from_millis(6_000));
        assert_eq!(cluster.engine(carol).connection_state(), ChannelState::Connected);
        assert!(cluster.server().is_connected(&UserId::from("carol")));
    }

    #[test]
    fn command_without_settle_stays_pending() {
        let (mut cluster, alice, bob) = cluster();
        let conv = cluster.server_mut().create_group("team", &[UserId::from("alice"), UserId::from("bob")], Timestamp::ZERO).unwrap();
        cluster.start_all();
        cluster.command_and_settle(alice, UserCommand::SelectConversation(conv.clone()));

        cluster.command(alice, UserCommand::SendMessage("hi".into()));

        assert_eq!(cluster.engine(alice).messages().pending_count(), 1);
        assert_eq!(cluster.engine(bob).conversations().unread_count(&conv), Some(0));

        cluster.settle();
        assert_eq!(cluster.engine(alice).messages().pending_count(), 0);
        assert_eq!(cluster.engine(bob).conversations().unread_count(&conv), Some(1));
    }
}
