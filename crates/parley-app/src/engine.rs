//! Synchronization engine.
//!
//! This module defines the [`SyncEngine`], the coordinator that owns the
//! active-conversation selection and wires channel input into the stores and
//! the typing tracker.
//!
//! This is a pure state machine: every operation takes the current time and
//! returns [`SyncAction`]s for the driver to execute. Completions and channel
//! input come back through [`SyncEngine::handle`].
//!
//! # Responsibilities
//!
//! - Seeds the stores from snapshots and keeps them current from push events.
//! - Discards message snapshots superseded by a newer conversation switch.
//! - Reconciles optimistic sends with their durable response and push echo.
//! - Debounces outbound typing and decays remote typing entries.

use parley_core::{
    ChannelAction, ChannelState, ConversationStore, IncomingOutcome, MessageStore, RealtimeChannel,
    SessionCredentials, SyncError, TypingTracker, channel::EventHandler,
};
use parley_proto::{
    ChannelFrame, Conversation, ConversationId, EventName, Message, MessageId, OutboundEvent,
    PushEvent, Timestamp, UserId,
};
use tracing::{debug, info, warn};

use crate::{StateChange, SyncAction, SyncConfig, SyncEvent, UserCommand};

/// Outbound typing state of the local user.
#[derive(Debug, Clone)]
struct LocalTyping {
    conversation_id: ConversationId,
    last_keystroke: Timestamp,
}

/// Client-side synchronization engine.
#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    /// Local user.
    user_id: UserId,
    credentials: SessionCredentials,
    channel: RealtimeChannel,
    conversations: ConversationStore,
    messages: MessageStore,
    typing: TypingTracker,
    /// Currently selected conversation. `None` until the user selects one.
    active: Option<ConversationId>,
    /// Bumped on every conversation switch; tags message snapshot requests.
    generation: u64,
    next_temp_id: u64,
    /// Set while a `typing(true)` went out without a matching `false`.
    local_typing: Option<LocalTyping>,
    last_sweep: Option<Timestamp>,
    started: bool,
}

impl SyncEngine {
    /// Create an idle engine for `user_id`.
    pub fn new(config: SyncConfig, user_id: UserId, credentials: SessionCredentials) -> Self {
        Self {
            channel: RealtimeChannel::new(config.channel.clone()),
            conversations: ConversationStore::new(),
            messages: MessageStore::new(config.echo_tolerance),
            typing: TypingTracker::new(config.typing_expiry),
            config,
            user_id,
            credentials,
            active: None,
            generation: 0,
            next_temp_id: 0,
            local_typing: None,
            last_sweep: None,
            started: false,
        }
    }

    /// Local user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Selected conversation.
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Current message snapshot generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Conversation list.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Messages of the selected conversation.
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Channel connection state.
    pub fn connection_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Realtime channel.
    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    /// Whether anyone is typing in the selected conversation.
    pub fn is_anyone_typing(&self, now: Timestamp) -> bool {
        self.active.as_ref().is_some_and(|active| self.typing.is_anyone_typing(active, now))
    }

    /// Users typing in `conversation`, sorted.
    pub fn typing_users(&self, conversation: &ConversationId, now: Timestamp) -> Vec<UserId> {
        self.typing.typing_users(conversation, now)
    }

    /// Display title of a conversation for the local user.
    pub fn title(&self, conversation: &ConversationId) -> Option<String> {
        self.conversations.get(conversation).map(|c| c.title(&self.user_id))
    }

    /// Register an observer for raw push events.
    pub fn on_channel_event(&mut self, name: EventName, handler: EventHandler) {
        self.channel.on_event(name, handler);
    }

    /// Fetch the conversation list and open the channel. Runs once.
    pub fn start(&mut self, now: Timestamp) -> Vec<SyncAction> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        info!(user = %self.user_id, "sync engine starting");

        let mut actions = vec![SyncAction::FetchConversations];
        let opened = self.channel.connect(self.credentials.clone(), now);
        actions.extend(self.channel_actions(opened));
        actions.push(self.connection_changed());
        actions
    }

    /// Stop local typing and close the channel.
    pub fn shutdown(&mut self) -> Vec<SyncAction> {
        let mut actions = self.stop_local_typing();
        let closed = self.channel.disconnect();
        if !closed.is_empty() {
            actions.extend(self.channel_actions(closed));
            actions.push(self.connection_changed());
        }
        self.started = false;
        actions
    }

    /// Select a conversation.
    ///
    /// Stops local typing in the previous room, resets the message view,
    /// fetches the snapshot under a new generation, joins the room, and marks
    /// the conversation read. Selecting the active conversation again only
    /// marks it read.
    pub fn set_active_conversation(
        &mut self,
        conversation_id: ConversationId,
        _now: Timestamp,
    ) -> Vec<SyncAction> {
        if self.active.as_ref() == Some(&conversation_id) {
            return self.mark_active_read().into_iter().collect();
        }

        let mut actions = self.stop_local_typing();
        if let Some(previous) = self.active.take()
            && self.typing.clear_conversation(&previous)
        {
            actions.push(SyncAction::Notify(StateChange::TypingChanged {
                conversation_id: previous,
                users: Vec::new(),
            }));
        }

        self.generation += 1;
        self.active = Some(conversation_id.clone());
        self.messages.reset(Some(conversation_id.clone()));
        debug!(%conversation_id, generation = self.generation, "active conversation changed");

        actions.push(SyncAction::FetchMessages {
            conversation_id: conversation_id.clone(),
            generation: self.generation,
        });
        let joined = self.channel.join(conversation_id.clone());
        actions.extend(self.channel_actions(joined));
        actions.extend(self.mark_active_read());
        actions.push(SyncAction::Notify(StateChange::MessagesChanged { conversation_id }));
        actions
    }

    /// Send a message to the selected conversation.
    ///
    /// Appends an optimistic entry and requests the durable send.
    ///
    /// # Errors
    ///
    /// - `SyncError::Validation` if `content` is blank or no conversation is
    ///   selected
    pub fn send_message(
        &mut self,
        content: impl Into<String>,
        now: Timestamp,
    ) -> Result<Vec<SyncAction>, SyncError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SyncError::Validation("message is empty".to_owned()));
        }
        let Some(conversation_id) = self.active.clone() else {
            return Err(SyncError::Validation("no active conversation".to_owned()));
        };

        let temp_id = MessageId::local(self.next_temp_id);
        let created_at = self.messages.last_timestamp().map_or(now, |last| now.max(last.next()));
        self.messages.append_optimistic(Message::optimistic(
            temp_id.clone(),
            conversation_id.clone(),
            self.user_id.clone(),
            content.clone(),
            created_at,
        ))?;
        self.next_temp_id += 1;

        let mut actions = vec![
            SyncAction::Notify(StateChange::MessagesChanged {
                conversation_id: conversation_id.clone(),
            }),
            SyncAction::PostMessage { conversation_id, content, temp_id },
        ];
        actions.extend(self.stop_local_typing());
        Ok(actions)
    }

    /// Report local keystroke activity.
    ///
    /// At most one `typing(true)` goes out per burst; [`Self::tick`] emits
    /// `typing(false)` after `typing_idle` without keystrokes.
    pub fn notify_local_typing(&mut self, is_typing: bool, now: Timestamp) -> Vec<SyncAction> {
        if !is_typing {
            return self.stop_local_typing();
        }
        let Some(active) = self.active.clone() else {
            return Vec::new();
        };

        if let Some(local) = self.local_typing.as_mut()
            && local.conversation_id == active
        {
            local.last_keystroke = now;
            return Vec::new();
        }

        let mut actions = self.stop_local_typing();
        match self.channel.send(OutboundEvent::typing(active.clone(), true)) {
            Ok(action) => {
                self.local_typing = Some(LocalTyping { conversation_id: active, last_keystroke: now });
                actions.extend(self.channel_actions(vec![action]));
            },
            Err(err) => debug!(%err, "typing signal dropped"),
        }
        actions
    }

    /// Request a direct conversation with `participant_id`.
    ///
    /// # Errors
    ///
    /// - `SyncError::Validation` if the participant id is empty or is the
    ///   local user
    pub fn start_conversation(&mut self, participant_id: UserId) -> Result<Vec<SyncAction>, SyncError> {
        if participant_id.is_empty() || participant_id == self.user_id {
            return Err(SyncError::Validation(format!("invalid participant '{participant_id}'")));
        }
        Ok(vec![SyncAction::CreateConversation { participant_id }])
    }

    /// Search the user directory. A blank query clears the results.
    pub fn search_users(&mut self, query: impl Into<String>) -> Vec<SyncAction> {
        let query = query.into();
        if query.trim().is_empty() {
            return vec![SyncAction::Notify(StateChange::SearchResults { query, users: Vec::new() })];
        }
        vec![SyncAction::SearchUsers { query }]
    }

    /// Re-fetch the conversation list and the selected conversation's
    /// messages.
    ///
    /// The message fetch runs under a new generation, so a response still in
    /// flight from before the refresh is discarded. Loaded entries stay visible
    /// until the new snapshot arrives.
    pub fn refresh_conversations(&mut self) -> Vec<SyncAction> {
        let mut actions = vec![SyncAction::FetchConversations];
        if let Some(conversation_id) = self.active.clone() {
            self.generation += 1;
            debug!(%conversation_id, generation = self.generation, "refetching messages");
            actions.push(SyncAction::FetchMessages { conversation_id, generation: self.generation });
        }
        actions
    }

    /// Apply a user command.
    ///
    /// Rejected commands surface as [`StateChange::CommandRejected`] instead
    /// of an error so every frontend reports them the same way.
    pub fn apply_command(&mut self, command: UserCommand, now: Timestamp) -> Vec<SyncAction> {
        let result = match command {
            UserCommand::SelectConversation(id) => Ok(self.set_active_conversation(id, now)),
            UserCommand::SendMessage(content) => self.send_message(content, now),
            UserCommand::Typing(is_typing) => Ok(self.notify_local_typing(is_typing, now)),
            UserCommand::StartConversation(user) => self.start_conversation(user),
            UserCommand::SearchUsers(query) => Ok(self.search_users(query)),
            UserCommand::Refresh => Ok(self.refresh_conversations()),
            UserCommand::Quit => Ok(self.shutdown()),
        };

        result.unwrap_or_else(|error| {
            warn!(%error, "command rejected");
            vec![SyncAction::Notify(StateChange::CommandRejected { error })]
        })
    }

    /// Process periodic maintenance: channel reconnect, typing sweep, and
    /// the local typing idle timeout.
    pub fn tick(&mut self, now: Timestamp) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        let reopened = self.channel.tick(now);
        if !reopened.is_empty() {
            actions.extend(self.channel_actions(reopened));
            actions.push(self.connection_changed());
        }

        let sweep_due =
            self.last_sweep.is_none_or(|last| now - last >= self.config.sweep_interval);
        if sweep_due {
            self.last_sweep = Some(now);
            for conversation_id in self.typing.sweep_expired(now) {
                actions.push(self.typing_changed(conversation_id, now));
            }
        }

        let idle = self
            .local_typing
            .as_ref()
            .is_some_and(|local| now - local.last_keystroke >= self.config.typing_idle);
        if idle {
            actions.extend(self.stop_local_typing());
        }

        actions
    }

    /// Process a driver-reported event.
    pub fn handle(&mut self, event: SyncEvent, now: Timestamp) -> Vec<SyncAction> {
        match event {
            SyncEvent::ChannelOpened => {
                let joined = self.channel.handle_connected(now);
                let mut actions = self.channel_actions(joined);
                actions.push(self.connection_changed());
                actions
            },
            SyncEvent::ChannelClosed { reason } => {
                // Server drops room state with the connection, including our typing flag
                self.local_typing = None;
                self.channel.handle_disconnected(&reason, now);
                vec![self.connection_changed()]
            },
            SyncEvent::ChannelFrame(frame) => self.handle_frame(&frame, now),
            SyncEvent::ConversationsLoaded(conversations) => {
                self.handle_conversations_loaded(conversations)
            },
            SyncEvent::ConversationsFailed { error } => {
                warn!(%error, "conversation fetch failed");
                vec![fetch_failed(error)]
            },
            SyncEvent::MessagesLoaded { conversation_id, generation, messages } => {
                self.handle_messages_loaded(conversation_id, generation, messages)
            },
            SyncEvent::MessagesFailed { conversation_id, generation, error } => {
                if let Err(stale) = self.check_generation(&conversation_id, generation) {
                    debug!(%stale, "discarding failed stale message fetch");
                    return Vec::new();
                }
                warn!(%conversation_id, %error, "message fetch failed");
                vec![fetch_failed(error)]
            },
            SyncEvent::MessageSent { temp_id, message } => self.handle_message_sent(&temp_id, message),
            SyncEvent::MessageSendFailed { temp_id, error } => {
                warn!(%temp_id, %error, "message send failed");
                let mut actions = Vec::new();
                if self.messages.discard_pending(&temp_id).is_some()
                    && let Some(conversation_id) = self.active.clone()
                {
                    actions.push(SyncAction::Notify(StateChange::MessagesChanged { conversation_id }));
                }
                actions.push(SyncAction::Notify(StateChange::SendFailed {
                    temp_id,
                    error: SyncError::TransientNetwork(error),
                }));
                actions
            },
            SyncEvent::ConversationCreated(conversation) => {
                self.handle_conversation_created(conversation, now)
            },
            SyncEvent::ConversationCreateFailed { participant_id, error } => {
                warn!(%participant_id, %error, "conversation creation failed");
                vec![fetch_failed(error)]
            },
            SyncEvent::UsersFound { query, users } => {
                let users = users.into_iter().filter(|user| user.id != self.user_id).collect();
                vec![SyncAction::Notify(StateChange::SearchResults { query, users })]
            },
            SyncEvent::SearchFailed { query, error } => {
                warn!(%query, %error, "user search failed");
                vec![fetch_failed(error)]
            },
        }
    }

    fn handle_frame(&mut self, frame: &ChannelFrame, now: Timestamp) -> Vec<SyncAction> {
        let event = match self.channel.decode_inbound(frame) {
            Ok(event) => event,
            Err(err) => {
                warn!(event = %frame.name, %err, "dropping malformed channel event");
                return vec![rejected(&frame.name, err.into())];
            },
        };
        self.channel.dispatch(&event);

        match event {
            PushEvent::MessageNew(message) => self.handle_push_message(message, now),
            PushEvent::Typing(typing) => {
                if typing.user_id == self.user_id {
                    return Vec::new();
                }
                let changed = self.typing.set_typing(
                    &typing.conversation_id,
                    &typing.user_id,
                    typing.is_typing,
                    now,
                );
                if changed { vec![self.typing_changed(typing.conversation_id, now)] } else { Vec::new() }
            },
            PushEvent::PresenceOnline(presence) => {
                vec![SyncAction::Notify(StateChange::PresenceChanged {
                    user_id: presence.user_id,
                    online: true,
                })]
            },
            PushEvent::PresenceOffline(presence) => {
                vec![SyncAction::Notify(StateChange::PresenceChanged {
                    user_id: presence.user_id,
                    online: false,
                })]
            },
        }
    }

    fn handle_push_message(&mut self, message: Message, now: Timestamp) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        // A sent message ends the sender's typing burst
        if self.typing.set_typing(&message.conversation_id, &message.sender_id, false, now) {
            actions.push(self.typing_changed(message.conversation_id.clone(), now));
        }

        if self.active.as_ref() == Some(&message.conversation_id) {
            match self.messages.reconcile_incoming(message.clone()) {
                Ok(outcome) if outcome.changed() => {
                    actions.push(SyncAction::Notify(StateChange::MessagesChanged {
                        conversation_id: message.conversation_id.clone(),
                    }));
                },
                Ok(_) => debug!(id = %message.id, "duplicate message ignored"),
                Err(err) => {
                    warn!(%err, "dropping invalid message");
                    actions.push(rejected(EventName::MessageNew.as_str(), err.into()));
                    return actions;
                },
            }
        }

        actions.extend(self.apply_to_conversations(&message));
        actions
    }

    fn handle_message_sent(&mut self, temp_id: &MessageId, message: Message) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        match self.messages.confirm_pending(temp_id, message.clone()) {
            Ok(outcome) if outcome.changed() => {
                actions.push(SyncAction::Notify(StateChange::MessagesChanged {
                    conversation_id: message.conversation_id.clone(),
                }));
            },
            Ok(outcome) => debug!(%temp_id, ?outcome, "send response already reconciled"),
            Err(err) => {
                warn!(%temp_id, %err, "dropping invalid send response");
                return vec![rejected("send response", err.into())];
            },
        }

        actions.extend(self.apply_to_conversations(&message));
        actions
    }

    fn apply_to_conversations(&mut self, message: &Message) -> Vec<SyncAction> {
        // Own messages never count as unread
        let read_scope = if message.sender_id == self.user_id {
            Some(&message.conversation_id)
        } else {
            self.active.as_ref()
        };

        match self.conversations.apply_incoming_message(message, read_scope) {
            Ok(IncomingOutcome::Applied { .. }) => {
                vec![SyncAction::Notify(StateChange::ConversationsChanged)]
            },
            Ok(IncomingOutcome::Duplicate) => Vec::new(),
            Ok(IncomingOutcome::UnknownConversation) => {
                debug!(conversation = %message.conversation_id, "message for unknown conversation");
                vec![SyncAction::FetchConversations]
            },
            Err(err) => {
                warn!(%err, "dropping invalid message");
                vec![rejected(EventName::MessageNew.as_str(), err.into())]
            },
        }
    }

    fn handle_conversations_loaded(&mut self, conversations: Vec<Conversation>) -> Vec<SyncAction> {
        if let Err(err) = self.conversations.load_snapshot(conversations) {
            warn!(%err, "dropping invalid conversation snapshot");
            return vec![rejected("conversations", err.into())];
        }

        // Snapshot counters include messages read while the fetch was in flight;
        // ConversationsChanged below covers the reset
        let _ = self.mark_active_read();
        vec![SyncAction::Notify(StateChange::ConversationsChanged)]
    }

    fn handle_messages_loaded(
        &mut self,
        conversation_id: ConversationId,
        generation: u64,
        messages: Vec<Message>,
    ) -> Vec<SyncAction> {
        if let Err(stale) = self.check_generation(&conversation_id, generation) {
            debug!(%stale, "discarding stale message snapshot");
            return Vec::new();
        }

        match self.messages.load_snapshot(conversation_id.clone(), messages) {
            Ok(()) => vec![SyncAction::Notify(StateChange::MessagesChanged { conversation_id })],
            Err(err) => {
                warn!(%conversation_id, %err, "dropping invalid message snapshot");
                vec![rejected("messages", err.into())]
            },
        }
    }

    fn handle_conversation_created(
        &mut self,
        conversation: Conversation,
        now: Timestamp,
    ) -> Vec<SyncAction> {
        let conversation_id = conversation.id.clone();
        let existing = self.conversations.get(&conversation_id).cloned();

        // A reused conversation keeps the locally tracked preview and counters
        let merged = match existing {
            Some(existing) => Conversation {
                last_message: existing.last_message,
                unread_count: existing.unread_count,
                updated_at: existing.updated_at.max(conversation.updated_at),
                ..conversation
            },
            None => conversation,
        };

        if let Err(err) = self.conversations.upsert_conversation(merged) {
            warn!(%err, "dropping invalid conversation");
            return vec![rejected("conversation", err.into())];
        }

        let mut actions = vec![SyncAction::Notify(StateChange::ConversationsChanged)];
        actions.extend(self.set_active_conversation(conversation_id, now));
        actions
    }

    fn check_generation(&self, conversation_id: &ConversationId, generation: u64) -> Result<(), SyncError> {
        if generation == self.generation && self.active.as_ref() == Some(conversation_id) {
            Ok(())
        } else {
            Err(SyncError::StaleResponse { generation, current: self.generation })
        }
    }

    fn mark_active_read(&mut self) -> Option<SyncAction> {
        let active = self.active.as_ref()?;
        self.conversations
            .mark_read(active)
            .then_some(SyncAction::Notify(StateChange::ConversationsChanged))
    }

    fn stop_local_typing(&mut self) -> Vec<SyncAction> {
        let Some(local) = self.local_typing.take() else {
            return Vec::new();
        };
        match self.channel.send(OutboundEvent::typing(local.conversation_id, false)) {
            Ok(action) => self.channel_actions(vec![action]),
            Err(err) => {
                debug!(%err, "typing stop dropped");
                Vec::new()
            },
        }
    }

    fn typing_changed(&self, conversation_id: ConversationId, now: Timestamp) -> SyncAction {
        let users = self.typing.typing_users(&conversation_id, now);
        SyncAction::Notify(StateChange::TypingChanged { conversation_id, users })
    }

    fn connection_changed(&self) -> SyncAction {
        SyncAction::Notify(StateChange::ConnectionChanged(self.channel.state()))
    }

    fn channel_actions(&self, actions: Vec<ChannelAction>) -> Vec<SyncAction> {
        actions
            .into_iter()
            .filter_map(|action| match action {
                ChannelAction::Open { credentials } => Some(SyncAction::OpenChannel { credentials }),
                ChannelAction::Close => Some(SyncAction::CloseChannel),
                ChannelAction::Emit(event) => match event.encode() {
                    Ok(frame) => Some(SyncAction::Emit(frame)),
                    Err(err) => {
                        warn!(event = %event.name(), %err, "failed to encode outbound event");
                        None
                    },
                },
            })
            .collect()
    }
}

fn fetch_failed(error: String) -> SyncAction {
    SyncAction::Notify(StateChange::FetchFailed { error: SyncError::TransientNetwork(error) })
}

fn rejected(source: &str, error: SyncError) -> SyncAction {
    SyncAction::Notify(StateChange::EventRejected { source: source.to_owned(), error })
}

#[cfg(test)]
mod tests {
    use parley_proto::{TypingPayload, UserRef};

    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(SyncConfig::default(), UserId::from("me"), SessionCredentials::bearer("t"))
    }

    /// Engine with an open channel and two known conversations.
    fn connected() -> SyncEngine {
        let mut engine = engine();
        engine.start(at(0));
        engine.handle(SyncEvent::ChannelOpened, at(0));
        engine.handle(
            SyncEvent::ConversationsLoaded(vec![
                Conversation::new("c1", at(200)),
                Conversation::new("c2", at(100)),
            ]),
            at(0),
        );
        engine
    }

    fn push(event: &PushEvent) -> SyncEvent {
        SyncEvent::ChannelFrame(event.encode().unwrap())
    }

    fn emitted(actions: &[SyncAction]) -> Vec<OutboundEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                SyncAction::Emit(frame) => OutboundEvent::decode(frame).ok(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_fetches_and_connects_once() {
        let mut engine = engine();
        let actions = engine.start(at(0));

        assert_eq!(actions[0], SyncAction::FetchConversations);
        assert!(actions.iter().any(|a| matches!(a, SyncAction::OpenChannel { .. })));
        assert_eq!(engine.connection_state(), ChannelState::Connecting);
        assert!(engine.start(at(1)).is_empty());
    }

    #[test]
    fn selecting_conversation_fetches_joins_and_marks_read() {
        let mut engine = connected();
        engine.handle(SyncEvent::ConversationsLoaded(vec![Conversation::new("c1", at(1)).with_unread(3)]), at(0));

        let actions = engine.set_active_conversation("c1".into(), at(10));

        assert!(actions.contains(&SyncAction::FetchMessages { conversation_id: "c1".into(), generation: 1 }));
        assert_eq!(emitted(&actions), vec![OutboundEvent::join("c1".into())]);
        assert_eq!(engine.conversations().unread_count(&"c1".into()), Some(0));
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));
        engine.set_active_conversation("c2".into(), at(1));

        let stale = engine.handle(
            SyncEvent::MessagesLoaded {
                conversation_id: "c1".into(),
                generation: 1,
                messages: vec![Message::confirmed("m1", "c1", "u2", "old", at(5))],
            },
            at(2),
        );

        assert!(stale.is_empty());
        assert!(engine.messages().is_empty());
        assert_eq!(engine.messages().conversation_id(), Some(&ConversationId::from("c2")));
    }

    #[test]
    fn send_is_optimistic_then_confirmed_once() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));
        engine.handle(
            SyncEvent::MessagesLoaded {
                conversation_id: "c1".into(),
                generation: 1,
                messages: vec![Message::confirmed("m0", "c1", "u2", "hello", at(5_000))],
            },
            at(1),
        );

        let actions = engine.send_message("hi", at(1_000)).unwrap();
        let temp_id = MessageId::local(0);
        assert!(actions.contains(&SyncAction::PostMessage {
            conversation_id: "c1".into(),
            content: "hi".into(),
            temp_id: temp_id.clone(),
        }));
        let pending = engine.messages().get(&temp_id).unwrap();
        assert!(pending.pending);
        assert_eq!(pending.created_at, at(5_001));

        let confirmed = Message::confirmed("m1", "c1", "me", "hi", at(5_100));
        engine.handle(SyncEvent::ChannelFrame(PushEvent::MessageNew(confirmed.clone()).encode().unwrap()), at(2));
        engine.handle(SyncEvent::MessageSent { temp_id, message: confirmed }, at(3));

        let ids: Vec<_> = engine.messages().messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1"]);
        assert_eq!(engine.conversations().unread_count(&"c1".into()), Some(0));
    }

    #[test]
    fn send_validation() {
        let mut engine = connected();
        assert!(matches!(engine.send_message("hi", at(0)), Err(SyncError::Validation(_))));

        engine.set_active_conversation("c1".into(), at(0));
        assert!(matches!(engine.send_message("   ", at(0)), Err(SyncError::Validation(_))));
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn failed_send_removes_optimistic_entry() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));
        engine.send_message("hi", at(10)).unwrap();

        let actions = engine.handle(
            SyncEvent::MessageSendFailed { temp_id: MessageId::local(0), error: "503".into() },
            at(20),
        );

        assert!(engine.messages().is_empty());
        assert!(actions.iter().any(|a| matches!(a, SyncAction::Notify(StateChange::SendFailed { .. }))));
    }

    #[test]
    fn failed_message_fetch_is_retried_by_refresh() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));
        let failed = engine.handle(
            SyncEvent::MessagesFailed { conversation_id: "c1".into(), generation: 1, error: "503".into() },
            at(1),
        );
        assert!(failed.iter().any(|a| matches!(a, SyncAction::Notify(StateChange::FetchFailed { .. }))));

        let actions = engine.apply_command(UserCommand::Refresh, at(2));

        assert_eq!(actions, vec![
            SyncAction::FetchConversations,
            SyncAction::FetchMessages { conversation_id: "c1".into(), generation: 2 },
        ]);
        engine.handle(
            SyncEvent::MessagesLoaded {
                conversation_id: "c1".into(),
                generation: 2,
                messages: vec![Message::confirmed("m1", "c1", "u2", "back", at(5))],
            },
            at(3),
        );
        assert_eq!(engine.messages().len(), 1);
    }

    #[test]
    fn refresh_without_selection_only_fetches_conversations() {
        let mut engine = connected();

        assert_eq!(engine.refresh_conversations(), vec![SyncAction::FetchConversations]);
        assert_eq!(engine.generation(), 0);
    }

    #[test]
    fn push_racing_the_snapshot_survives_it() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));

        let late = Message::confirmed("m5", "c1", "u2", "late", at(500));
        engine.handle(push(&PushEvent::MessageNew(late)), at(1));
        engine.handle(
            SyncEvent::MessagesLoaded {
                conversation_id: "c1".into(),
                generation: 1,
                messages: vec![Message::confirmed("m1", "c1", "u2", "early", at(100))],
            },
            at(2),
        );

        let ids: Vec<_> = engine.messages().messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m5"]);
    }

    #[test]
    fn message_for_inactive_conversation_counts_unread_and_reorders() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));

        let message = Message::confirmed("m1", "c2", "u2", "yo", at(300));
        let actions = engine.handle(push(&PushEvent::MessageNew(message)), at(1));

        assert!(actions.contains(&SyncAction::Notify(StateChange::ConversationsChanged)));
        assert_eq!(engine.conversations().position(&"c2".into()), Some(0));
        assert_eq!(engine.conversations().unread_count(&"c2".into()), Some(1));
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn message_for_unknown_conversation_triggers_fetch() {
        let mut engine = connected();
        let message = Message::confirmed("m1", "c9", "u2", "yo", at(300));

        let actions = engine.handle(push(&PushEvent::MessageNew(message)), at(1));

        assert_eq!(actions, vec![SyncAction::FetchConversations]);
    }

    #[test]
    fn malformed_frame_is_rejected_without_mutation() {
        let mut engine = connected();
        let before = engine.conversations().conversations().to_vec();

        let actions =
            engine.handle(SyncEvent::ChannelFrame(ChannelFrame::new("message:new", vec![0xff, 0x00])), at(1));

        assert!(matches!(&actions[..], [SyncAction::Notify(StateChange::EventRejected { .. })]));
        assert_eq!(engine.conversations().conversations(), before.as_slice());
    }

    #[test]
    fn remote_typing_decays_on_tick() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));

        let typing = PushEvent::Typing(TypingPayload {
            conversation_id: "c1".into(),
            user_id: "u2".into(),
            is_typing: true,
        });
        engine.handle(push(&typing), at(1_000));
        assert!(engine.is_anyone_typing(at(1_000)));

        let early = engine.tick(at(5_900));
        assert!(!early.iter().any(|a| matches!(a, SyncAction::Notify(StateChange::TypingChanged { .. }))));

        // Next sweep is due one interval later
        let actions = engine.tick(at(6_900));
        assert!(actions.contains(&SyncAction::Notify(StateChange::TypingChanged {
            conversation_id: "c1".into(),
            users: Vec::new(),
        })));
        assert!(!engine.is_anyone_typing(at(6_900)));
    }

    #[test]
    fn sender_stops_typing_when_message_arrives() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));
        let typing = PushEvent::Typing(TypingPayload {
            conversation_id: "c1".into(),
            user_id: "u2".into(),
            is_typing: true,
        });
        engine.handle(push(&typing), at(1_000));

        let message = Message::confirmed("m1", "c1", "u2", "done", at(1_500));
        engine.handle(push(&PushEvent::MessageNew(message)), at(1_500));

        assert!(!engine.is_anyone_typing(at(1_500)));
    }

    #[test]
    fn local_typing_is_debounced_and_idles_out() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));

        let first = engine.notify_local_typing(true, at(100));
        let second = engine.notify_local_typing(true, at(900));
        assert_eq!(emitted(&first), vec![OutboundEvent::typing("c1".into(), true)]);
        assert!(second.is_empty());

        assert!(emitted(&engine.tick(at(3_899))).is_empty());
        assert_eq!(emitted(&engine.tick(at(3_900))), vec![OutboundEvent::typing("c1".into(), false)]);
        assert!(engine.notify_local_typing(false, at(4_000)).is_empty());
    }

    #[test]
    fn switching_conversation_stops_local_typing() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));
        engine.notify_local_typing(true, at(100));

        let actions = engine.set_active_conversation("c2".into(), at(200));

        assert_eq!(emitted(&actions), vec![
            OutboundEvent::typing("c1".into(), false),
            OutboundEvent::join("c2".into()),
        ]);
    }

    #[test]
    fn reconnect_rejoins_active_room() {
        let mut engine = connected();
        engine.set_active_conversation("c1".into(), at(0));

        engine.handle(SyncEvent::ChannelClosed { reason: "reset".into() }, at(1_000));
        assert_eq!(engine.connection_state(), ChannelState::Disconnected);
        let reopen = engine.tick(at(1_500));
        assert!(reopen.iter().any(|a| matches!(a, SyncAction::OpenChannel { .. })));

        let actions = engine.handle(SyncEvent::ChannelOpened, at(1_600));
        assert_eq!(emitted(&actions), vec![OutboundEvent::join("c1".into())]);
    }

    #[test]
    fn created_conversation_becomes_active() {
        let mut engine = connected();
        let created = Conversation::new("c3", at(400))
            .with_participant(UserRef::new("me", "me", "Me"))
            .with_participant(UserRef::new("u7", "ana", "Ana"));

        let actions = engine.handle(SyncEvent::ConversationCreated(created), at(500));

        assert_eq!(engine.active_conversation(), Some(&ConversationId::from("c3")));
        assert_eq!(engine.title(&"c3".into()).as_deref(), Some("Ana"));
        assert!(actions.iter().any(|a| matches!(a, SyncAction::FetchMessages { .. })));
    }

    #[test]
    fn search_filters_self_and_blank_query_clears() {
        let mut engine = connected();
        assert_eq!(engine.search_users(" "), vec![SyncAction::Notify(StateChange::SearchResults {
            query: " ".into(),
            users: Vec::new(),
        })]);

        let actions = engine.handle(
            SyncEvent::UsersFound {
                query: "a".into(),
                users: vec![UserRef::new("me", "me", "Me"), UserRef::new("u7", "ana", "Ana")],
            },
            at(0),
        );

        assert_eq!(actions, vec![SyncAction::Notify(StateChange::SearchResults {
            query: "a".into(),
            users: vec![UserRef::new("u7", "ana", "Ana")],
        })]);
    }

    #[test]
    fn rejected_command_becomes_notification() {
        let mut engine = connected();

        let actions = engine.apply_command(UserCommand::SendMessage("hi".into()), at(10));

        assert!(matches!(
            actions.as_slice(),
            [SyncAction::Notify(StateChange::CommandRejected { error: SyncError::Validation(_) })]
        ));
    }

    #[test]
    fn quit_command_closes_channel() {
        let mut engine = connected();

        let actions = engine.apply_command(UserCommand::Quit, at(10));

        assert!(actions.contains(&SyncAction::CloseChannel));
        assert_eq!(engine.connection_state(), ChannelState::Disconnected);
    }
}
