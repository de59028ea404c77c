//! Realtime channel state machine.
//!
//! Tracks the lifecycle of the persistent event channel and the room it is
//! subscribed to. Uses the action pattern: methods take time as input and
//! return [`ChannelAction`]s for the driver to execute. The driver reports
//! back with [`RealtimeChannel::handle_connected`] and
//! [`RealtimeChannel::handle_disconnected`].
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  connect / retry due   ┌────────────┐  opened   ┌───────────┐
//! │ Disconnected │───────────────────────>│ Connecting │──────────>│ Connected │
//! └──────────────┘<───────────────────────└────────────┘           └───────────┘
//!        ^            failed (backoff)                                   │
//!        └───────────────────────────────────────────────────────────────┘
//!                              dropped (backoff)
//! ```
//!
//! While the session is active, a lost connection is always retried. Room
//! membership does not survive a reconnect server-side, so the last joined
//! room is re-joined exactly once per established connection.

use std::{collections::BTreeMap, fmt, time::Duration};

use parley_proto::{ChannelFrame, ConversationId, EventName, OutboundEvent, ProtocolError, PushEvent, Timestamp};
use tracing::{debug, info, warn};

use crate::{env::Instant, error::ChannelError};

/// First reconnect delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for the reconnect delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Handler invoked for dispatched push events.
pub type EventHandler = Box<dyn FnMut(&PushEvent) + Send>;

/// Actions returned by the channel state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open the underlying connection.
    Open {
        /// Session credentials to present.
        credentials: SessionCredentials,
    },
    /// Emit an event over the open connection.
    Emit(OutboundEvent),
    /// Close the underlying connection.
    Close,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection. A retry may be scheduled.
    Disconnected,
    /// Open requested, waiting for the driver.
    Connecting,
    /// Connection established.
    Connected,
}

/// Channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Maximum delay between attempts.
    pub max_backoff: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { initial_backoff: DEFAULT_INITIAL_BACKOFF, max_backoff: DEFAULT_MAX_BACKOFF }
    }
}

impl ChannelConfig {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    ///
    /// Doubles per attempt, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Opaque session credentials passed through to the transport.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Bearer token, if the session has one.
    pub token: Option<String>,
}

impl SessionCredentials {
    /// Credentials carrying a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Channel lifecycle, room membership, and inbound dispatch.
///
/// Generic over the instant type so tests can drive reconnect timing with a
/// virtual clock.
pub struct RealtimeChannel<I = Timestamp> {
    config: ChannelConfig,
    state: ChannelState,
    credentials: SessionCredentials,
    /// Last requested room.
    room: Option<ConversationId>,
    /// Join for `room` emitted on the current connection.
    room_joined: bool,
    /// Consecutive failed attempts since the last established connection.
    attempt: u32,
    retry_at: Option<I>,
    /// Session open; reconnects are scheduled while true.
    active: bool,
    handlers: BTreeMap<EventName, Vec<EventHandler>>,
}

impl<I: fmt::Debug> fmt::Debug for RealtimeChannel<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers: usize = self.handlers.values().map(Vec::len).sum();
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state)
            .field("room", &self.room)
            .field("room_joined", &self.room_joined)
            .field("attempt", &self.attempt)
            .field("retry_at", &self.retry_at)
            .field("active", &self.active)
            .field("handlers", &handlers)
            .finish_non_exhaustive()
    }
}

impl<I> Default for RealtimeChannel<I> {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl<I> RealtimeChannel<I> {
    /// Create a disconnected channel.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: ChannelState::Disconnected,
            credentials: SessionCredentials::default(),
            room: None,
            room_joined: false,
            attempt: 0,
            retry_at: None,
            active: false,
            handlers: BTreeMap::new(),
        }
    }
}

impl<I: Instant> RealtimeChannel<I> {
    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Last requested room.
    pub fn room(&self) -> Option<&ConversationId> {
        self.room.as_ref()
    }

    /// Whether the join for [`Self::room`] went out on the current connection.
    pub fn is_room_joined(&self) -> bool {
        self.room_joined
    }

    /// Consecutive failed attempts.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// When the next reconnect attempt is due.
    pub fn next_retry_at(&self) -> Option<I> {
        self.retry_at
    }

    /// Whether the session is open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start the session and request a connection.
    ///
    /// No-op if the session is already active.
    pub fn connect(&mut self, credentials: SessionCredentials, _now: I) -> Vec<ChannelAction> {
        if self.active {
            return Vec::new();
        }

        self.active = true;
        self.credentials = credentials;
        self.attempt = 0;
        self.retry_at = None;
        self.open()
    }

    /// Driver reports the connection is established.
    ///
    /// Replays the pending room join, if any.
    pub fn handle_connected(&mut self, _now: I) -> Vec<ChannelAction> {
        if !self.active || self.state != ChannelState::Connecting {
            return Vec::new();
        }

        self.state = ChannelState::Connected;
        self.attempt = 0;
        self.retry_at = None;
        info!(room = ?self.room, "channel connected");

        self.room.clone().map(|room| self.emit_join(room)).into_iter().collect()
    }

    /// Driver reports the connection failed or dropped.
    ///
    /// Schedules a reconnect while the session is active.
    pub fn handle_disconnected(&mut self, reason: &str, now: I) -> Vec<ChannelAction> {
        self.state = ChannelState::Disconnected;
        self.room_joined = false;

        if !self.active {
            return Vec::new();
        }

        let delay = self.config.backoff(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.retry_at = Some(now + delay);
        warn!(reason, attempt = self.attempt, ?delay, "channel disconnected, retry scheduled");

        Vec::new()
    }

    /// Reopen the connection if a retry is due.
    pub fn tick(&mut self, now: I) -> Vec<ChannelAction> {
        match self.retry_at {
            Some(due) if self.active && self.state == ChannelState::Disconnected && now >= due => {
                debug!(attempt = self.attempt, "channel reconnecting");
                self.retry_at = None;
                self.open()
            },
            _ => Vec::new(),
        }
    }

    /// End the session. No further reconnects are attempted.
    pub fn disconnect(&mut self) -> Vec<ChannelAction> {
        self.active = false;
        self.retry_at = None;
        self.room_joined = false;

        if self.state == ChannelState::Disconnected {
            return Vec::new();
        }

        self.state = ChannelState::Disconnected;
        info!("channel closed");
        vec![ChannelAction::Close]
    }

    /// Subscribe to a conversation's room.
    ///
    /// Emits immediately when connected, otherwise the join is queued and
    /// replayed once the connection is established. Joining the room already
    /// joined on this connection is a no-op.
    pub fn join(&mut self, conversation: ConversationId) -> Vec<ChannelAction> {
        if self.room_joined && self.room.as_ref() == Some(&conversation) {
            return Vec::new();
        }

        self.room_joined = false;
        if self.state == ChannelState::Connected {
            vec![self.emit_join(conversation)]
        } else {
            debug!(%conversation, "join queued until connected");
            self.room = Some(conversation);
            Vec::new()
        }
    }

    /// Emit a fire-and-forget event.
    ///
    /// # Errors
    ///
    /// - `ChannelError::NotConnected` if there is no connection; the event is
    ///   dropped, never queued
    pub fn send(&mut self, event: OutboundEvent) -> Result<ChannelAction, ChannelError> {
        if self.state != ChannelState::Connected {
            return Err(ChannelError::NotConnected { event: event.name() });
        }
        Ok(ChannelAction::Emit(event))
    }

    /// Register a handler for an inbound event name.
    ///
    /// Handlers for the same name run in registration order.
    pub fn on_event(&mut self, name: EventName, handler: EventHandler) {
        self.handlers.entry(name).or_default().push(handler);
    }

    /// Decode a raw inbound frame.
    ///
    /// # Errors
    ///
    /// - Any `ProtocolError` from [`PushEvent::decode`]
    pub fn decode_inbound(&self, frame: &ChannelFrame) -> Result<PushEvent, ProtocolError> {
        PushEvent::decode(frame)
    }

    /// Invoke the handlers registered for `event`. Returns how many ran.
    pub fn dispatch(&mut self, event: &PushEvent) -> usize {
        let Some(handlers) = self.handlers.get_mut(&event.name()) else {
            return 0;
        };
        for handler in handlers.iter_mut() {
            handler(event);
        }
        handlers.len()
    }

    fn open(&mut self) -> Vec<ChannelAction> {
        self.state = ChannelState::Connecting;
        vec![ChannelAction::Open { credentials: self.credentials.clone() }]
    }

    fn emit_join(&mut self, room: ConversationId) -> ChannelAction {
        self.room = Some(room.clone());
        self.room_joined = true;
        ChannelAction::Emit(OutboundEvent::join(room))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use parley_proto::{PresencePayload, UserId};

    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn joins(actions: &[ChannelAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, ChannelAction::Emit(OutboundEvent::Join(_))))
            .count()
    }

    fn connected() -> RealtimeChannel {
        let mut channel = RealtimeChannel::default();
        channel.connect(SessionCredentials::bearer("t"), at(0));
        channel.handle_connected(at(0));
        channel
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ChannelConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(7), Duration::from_secs(30));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn connect_then_open() {
        let mut channel: RealtimeChannel = RealtimeChannel::default();
        let actions = channel.connect(SessionCredentials::bearer("t"), at(0));

        assert_eq!(channel.state(), ChannelState::Connecting);
        assert!(matches!(&actions[..], [ChannelAction::Open { .. }]));
        assert!(channel.connect(SessionCredentials::default(), at(1)).is_empty());

        assert!(channel.handle_connected(at(5)).is_empty());
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[test]
    fn join_before_connect_is_replayed_once() {
        let mut channel: RealtimeChannel = RealtimeChannel::default();
        assert!(channel.join("c1".into()).is_empty());

        channel.connect(SessionCredentials::default(), at(0));
        let actions = channel.handle_connected(at(1));

        assert_eq!(actions, vec![ChannelAction::Emit(OutboundEvent::join("c1".into()))]);
        assert!(channel.join("c1".into()).is_empty());
    }

    #[test]
    fn latest_queued_join_wins() {
        let mut channel: RealtimeChannel = RealtimeChannel::default();
        channel.join("c1".into());
        channel.join("c2".into());

        channel.connect(SessionCredentials::default(), at(0));
        let actions = channel.handle_connected(at(1));

        assert_eq!(actions, vec![ChannelAction::Emit(OutboundEvent::join("c2".into()))]);
    }

    #[test]
    fn reconnect_rejoins_exactly_once_per_connection() {
        let mut channel = connected();
        assert_eq!(joins(&channel.join("c1".into())), 1);

        let mut total = 0;
        let mut now = 0;
        for _ in 0..3 {
            channel.handle_disconnected("reset", at(now));
            now += 60_000;
            let open = channel.tick(at(now));
            assert!(matches!(&open[..], [ChannelAction::Open { .. }]));
            let actions = channel.handle_connected(at(now));
            total += joins(&actions);
            // Spurious duplicate report is ignored
            total += joins(&channel.handle_connected(at(now)));
        }

        assert_eq!(total, 3);
        assert_eq!(channel.room(), Some(&ConversationId::from("c1")));
    }

    #[test]
    fn failed_attempts_back_off() {
        let mut channel = connected();

        channel.handle_disconnected("reset", at(1_000));
        assert_eq!(channel.next_retry_at(), Some(at(1_500)));
        assert!(channel.tick(at(1_499)).is_empty());
        assert_eq!(channel.tick(at(1_500)).len(), 1);

        channel.handle_disconnected("refused", at(2_000));
        assert_eq!(channel.next_retry_at(), Some(at(3_000)));
        assert_eq!(channel.attempt(), 2);

        channel.tick(at(3_000));
        channel.handle_connected(at(3_100));
        assert_eq!(channel.attempt(), 0);
        assert_eq!(channel.next_retry_at(), None);
    }

    #[test]
    fn disconnect_stops_retries() {
        let mut channel = connected();

        assert_eq!(channel.disconnect(), vec![ChannelAction::Close]);
        channel.handle_disconnected("closed", at(10));

        assert!(!channel.is_active());
        assert_eq!(channel.next_retry_at(), None);
        assert!(channel.tick(at(60_000)).is_empty());
        assert!(channel.disconnect().is_empty());
    }

    #[test]
    fn send_requires_connection() {
        let mut channel: RealtimeChannel = RealtimeChannel::default();
        let event = OutboundEvent::typing("c1".into(), true);

        assert_eq!(
            channel.send(event.clone()),
            Err(ChannelError::NotConnected { event: EventName::Typing })
        );

        channel.connect(SessionCredentials::default(), at(0));
        channel.handle_connected(at(0));
        assert_eq!(channel.send(event.clone()), Ok(ChannelAction::Emit(event)));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut channel: RealtimeChannel = RealtimeChannel::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            channel.on_event(
                EventName::PresenceOnline,
                Box::new(move |_| seen.lock().unwrap().push(tag)),
            );
        }

        let online = PushEvent::PresenceOnline(PresencePayload { user_id: UserId::from("u1") });
        let offline = PushEvent::PresenceOffline(PresencePayload { user_id: UserId::from("u1") });

        assert_eq!(channel.dispatch(&online), 2);
        assert_eq!(channel.dispatch(&offline), 0);
        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn decode_inbound_rejects_client_events() {
        let channel: RealtimeChannel = RealtimeChannel::default();
        let frame = OutboundEvent::join("c1".into()).encode().unwrap();

        assert!(matches!(
            channel.decode_inbound(&frame),
            Err(ProtocolError::WrongDirection { .. })
        ));
    }

    #[test]
    fn credentials_are_redacted() {
        let rendered = format!("{:?}", SessionCredentials::bearer("secret"));
        assert!(!rendered.contains("secret"));
    }
}
