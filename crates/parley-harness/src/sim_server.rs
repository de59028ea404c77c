//! In-memory messaging backend for simulation.
//!
//! `SimServer` plays the server side of every interface the engine talks to:
//! the snapshot endpoints (conversations, messages, user search), durable
//! message posting, conversation creation, and the realtime channel with its
//! rooms. Channel frames pushed to a user are queued in that user's inbox
//! until their driver picks them up.
//!
//! Push routing follows the backend the client was built against:
//! - `message:new` goes to every connected participant, joined or not, so
//!   conversation lists stay current.
//! - `typing` goes only to other users joined to the conversation's room.
//! - `presence:*` goes to every other connected user.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex},
};

use parley_app::{SyncAction, SyncEvent};
use parley_proto::{
    ChannelFrame, Conversation, ConversationId, Message, MessageId, OutboundEvent, PresencePayload,
    PushEvent, Timestamp, TypingPayload, UserId, UserRef,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors returned by the simulated endpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimServerError {
    /// Requests fail while the server is marked unavailable.
    #[error("server unavailable")]
    Unavailable,
    /// Unknown user.
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    /// Unknown conversation.
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),
    /// User is not a participant of the conversation.
    #[error("{user} is not a participant of {conversation}")]
    NotParticipant {
        /// Requesting user.
        user: UserId,
        /// Target conversation.
        conversation: ConversationId,
    },
    /// Frame could not be encoded or decoded.
    #[error("bad frame: {0}")]
    BadFrame(String),
}

#[derive(Debug, Clone)]
struct StoredConversation {
    participants: BTreeSet<UserId>,
    group_name: Option<String>,
    messages: Vec<Message>,
    unread: BTreeMap<UserId, u32>,
    updated_at: Timestamp,
}

#[derive(Debug, Default)]
struct ChannelLink {
    connected: bool,
    room: Option<ConversationId>,
    inbox: VecDeque<ChannelFrame>,
    joins: Vec<ConversationId>,
}

/// Simulated backend.
#[derive(Debug, Default)]
pub struct SimServer {
    users: BTreeMap<UserId, UserRef>,
    conversations: BTreeMap<ConversationId, StoredConversation>,
    links: BTreeMap<UserId, ChannelLink>,
    next_message: u64,
    next_conversation: u64,
    unavailable: bool,
}

/// Server shared between the drivers of several simulated clients.
pub type SharedSimServer = Arc<Mutex<SimServer>>;

/// Create an empty shared server.
pub fn create_shared_server() -> SharedSimServer {
    Arc::new(Mutex::new(SimServer::new()))
}

impl SimServer {
    /// Create an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn add_user(&mut self, user: UserRef) {
        self.users.insert(user.id.clone(), user);
    }

    /// Make every request and connection attempt fail (or succeed again).
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Create a group conversation.
    ///
    /// # Errors
    ///
    /// - `SimServerError::UnknownUser` if a member is not registered
    pub fn create_group(
        &mut self,
        name: &str,
        members: &[UserId],
        now: Timestamp,
    ) -> Result<ConversationId, SimServerError> {
        for member in members {
            self.user(member)?;
        }
        let id = self.allocate_conversation(members.iter().cloned().collect(), Some(name.to_owned()), now);
        Ok(id)
    }

    /// Create a direct conversation, or return the existing one.
    ///
    /// # Errors
    ///
    /// - `SimServerError::Unavailable` while unavailable
    /// - `SimServerError::UnknownUser` if either user is not registered
    pub fn create_conversation(
        &mut self,
        user: &UserId,
        participant: &UserId,
        now: Timestamp,
    ) -> Result<Conversation, SimServerError> {
        self.check_available()?;
        self.user(user)?;
        self.user(participant)?;

        let pair: BTreeSet<UserId> = [user.clone(), participant.clone()].into_iter().collect();
        let existing = self
            .conversations
            .iter()
            .find(|(_, c)| c.group_name.is_none() && c.participants == pair)
            .map(|(id, _)| id.clone());

        let id = match existing {
            Some(id) => id,
            None => self.allocate_conversation(pair, None, now),
        };
        self.conversation_view(user, &id)
    }

    /// Conversations `user` participates in, as that user sees them.
    ///
    /// # Errors
    ///
    /// - `SimServerError::Unavailable` while unavailable
    /// - `SimServerError::UnknownUser` if the user is not registered
    pub fn conversations(&self, user: &UserId) -> Result<Vec<Conversation>, SimServerError> {
        self.check_available()?;
        self.user(user)?;

        self.conversations
            .iter()
            .filter(|(_, c)| c.participants.contains(user))
            .map(|(id, _)| self.conversation_view(user, id))
            .collect()
    }

    /// Messages of a conversation, oldest first. Clears the user's unread
    /// counter.
    ///
    /// # Errors
    ///
    /// - `SimServerError::Unavailable` while unavailable
    /// - `SimServerError::UnknownConversation` / `NotParticipant`
    pub fn messages(
        &mut self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, SimServerError> {
        self.check_available()?;
        let stored = self.participant_of(user, conversation)?;
        stored.unread.insert(user.clone(), 0);
        Ok(stored.messages.clone())
    }

    /// Durably store a message and push it to every connected participant.
    ///
    /// # Errors
    ///
    /// - `SimServerError::Unavailable` while unavailable
    /// - `SimServerError::UnknownConversation` / `NotParticipant`
    pub fn post_message(
        &mut self,
        user: &UserId,
        conversation: &ConversationId,
        content: &str,
        now: Timestamp,
    ) -> Result<Message, SimServerError> {
        self.check_available()?;
        self.participant_of(user, conversation)?;

        self.next_message += 1;
        let message = Message::confirmed(
            MessageId::new(format!("m{}", self.next_message)),
            conversation.clone(),
            user.clone(),
            content,
            now,
        );

        let stored = self.participant_of(user, conversation)?;
        stored.messages.push(message.clone());
        stored.updated_at = stored.updated_at.max(now);
        for participant in &stored.participants {
            if participant != user {
                let unread = stored.unread.entry(participant.clone()).or_default();
                *unread = unread.saturating_add(1);
            }
        }
        let recipients: Vec<UserId> = stored.participants.iter().cloned().collect();

        self.push_to(recipients.iter(), &PushEvent::MessageNew(message.clone()))?;
        debug!(id = %message.id, %conversation, "message stored");
        Ok(message)
    }

    /// Users whose handle or display name contains `query`, case-insensitive.
    ///
    /// # Errors
    ///
    /// - `SimServerError::Unavailable` while unavailable
    pub fn search_users(&self, query: &str) -> Result<Vec<UserRef>, SimServerError> {
        self.check_available()?;
        let needle = query.to_lowercase();
        Ok(self
            .users
            .values()
            .filter(|u| {
                u.username.to_lowercase().contains(&needle) || u.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    /// Open `user`'s channel and announce them online.
    ///
    /// # Errors
    ///
    /// - `SimServerError::Unavailable` while unavailable
    /// - `SimServerError::UnknownUser` if the user is not registered
    pub fn connect(&mut self, user: &UserId) -> Result<(), SimServerError> {
        self.check_available()?;
        self.user(user)?;

        let link = self.links.entry(user.clone()).or_default();
        link.connected = true;
        link.room = None;

        let others = self.connected_except(user);
        self.push_to(others.iter(), &PushEvent::PresenceOnline(PresencePayload { user_id: user.clone() }))
    }

    /// Drop `user`'s channel. Room membership is lost.
    pub fn disconnect(&mut self, user: &UserId) {
        let Some(link) = self.links.get_mut(user) else {
            return;
        };
        if !link.connected {
            return;
        }
        link.connected = false;
        link.room = None;
        link.inbox.clear();

        let others = self.connected_except(user);
        // Presence frames always encode
        let _ = self.push_to(
            others.iter(),
            &PushEvent::PresenceOffline(PresencePayload { user_id: user.clone() }),
        );
    }

    /// Process a frame emitted by `user`'s client.
    ///
    /// # Errors
    ///
    /// - `SimServerError::BadFrame` if the frame does not decode
    pub fn handle_client_frame(&mut self, user: &UserId, frame: &ChannelFrame) -> Result<(), SimServerError> {
        let event = OutboundEvent::decode(frame).map_err(|e| SimServerError::BadFrame(e.to_string()))?;
        let connected = self.links.get(user).is_some_and(|link| link.connected);
        if !connected {
            trace!(%user, "frame from disconnected client ignored");
            return Ok(());
        }

        match event {
            OutboundEvent::Join(join) => {
                if self.participant_of(user, &join.conversation_id).is_err() {
                    debug!(%user, conversation = %join.conversation_id, "join refused");
                    return Ok(());
                }
                if let Some(link) = self.links.get_mut(user) {
                    link.room = Some(join.conversation_id.clone());
                    link.joins.push(join.conversation_id);
                }
                Ok(())
            },
            OutboundEvent::Typing(typing) => {
                let room_members: Vec<UserId> = self
                    .links
                    .iter()
                    .filter(|(id, link)| {
                        *id != user && link.connected && link.room.as_ref() == Some(&typing.conversation_id)
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                let event = PushEvent::Typing(TypingPayload {
                    conversation_id: typing.conversation_id,
                    user_id: user.clone(),
                    is_typing: typing.is_typing,
                });
                self.push_to(room_members.iter(), &event)
            },
        }
    }

    /// Take the frames queued for `user`.
    pub fn take_inbox(&mut self, user: &UserId) -> Vec<ChannelFrame> {
        self.links.get_mut(user).map(|link| link.inbox.drain(..).collect()).unwrap_or_default()
    }

    /// Pop the next frame queued for `user`.
    pub fn pop_frame(&mut self, user: &UserId) -> Option<ChannelFrame> {
        self.links.get_mut(user).and_then(|link| link.inbox.pop_front())
    }

    /// Whether `user`'s channel is open.
    pub fn is_connected(&self, user: &UserId) -> bool {
        self.links.get(user).is_some_and(|link| link.connected)
    }

    /// Room `user` is joined to.
    pub fn room_of(&self, user: &UserId) -> Option<&ConversationId> {
        self.links.get(user).and_then(|link| link.room.as_ref())
    }

    /// Every join `user` has sent, in order.
    pub fn joins_of(&self, user: &UserId) -> &[ConversationId] {
        self.links.get(user).map(|link| link.joins.as_slice()).unwrap_or_default()
    }

    /// Number of stored messages in a conversation.
    pub fn message_count(&self, conversation: &ConversationId) -> usize {
        self.conversations.get(conversation).map_or(0, |c| c.messages.len())
    }

    /// Stored messages of a conversation, oldest first.
    pub fn stored_messages(&self, conversation: &ConversationId) -> &[Message] {
        self.conversations.get(conversation).map(|c| c.messages.as_slice()).unwrap_or_default()
    }

    /// Serve a request/response action on behalf of `user`.
    ///
    /// Returns the completion the client's driver reports back, or `None` if
    /// `action` is not a request.
    pub fn serve(&mut self, user: &UserId, action: SyncAction, now: Timestamp) -> Option<SyncEvent> {
        let event = match action {
            SyncAction::FetchConversations => match self.conversations(user) {
                Ok(conversations) => SyncEvent::ConversationsLoaded(conversations),
                Err(err) => SyncEvent::ConversationsFailed { error: err.to_string() },
            },
            SyncAction::FetchMessages { conversation_id, generation } => {
                match self.messages(user, &conversation_id) {
                    Ok(messages) => SyncEvent::MessagesLoaded { conversation_id, generation, messages },
                    Err(err) => {
                        SyncEvent::MessagesFailed { conversation_id, generation, error: err.to_string() }
                    },
                }
            },
            SyncAction::PostMessage { conversation_id, content, temp_id } => {
                match self.post_message(user, &conversation_id, &content, now) {
                    Ok(message) => SyncEvent::MessageSent { temp_id, message },
                    Err(err) => SyncEvent::MessageSendFailed { temp_id, error: err.to_string() },
                }
            },
            SyncAction::CreateConversation { participant_id } => {
                match self.create_conversation(user, &participant_id, now) {
                    Ok(conversation) => SyncEvent::ConversationCreated(conversation),
                    Err(err) => SyncEvent::ConversationCreateFailed { participant_id, error: err.to_string() },
                }
            },
            SyncAction::SearchUsers { query } => match self.search_users(&query) {
                Ok(users) => SyncEvent::UsersFound { query, users },
                Err(err) => SyncEvent::SearchFailed { query, error: err.to_string() },
            },
            SyncAction::OpenChannel { .. }
            | SyncAction::Emit(_)
            | SyncAction::CloseChannel
            | SyncAction::Notify(_) => return None,
        };
        trace!(%user, ?event, "request served");
        Some(event)
    }

    fn check_available(&self) -> Result<(), SimServerError> {
        if self.unavailable { Err(SimServerError::Unavailable) } else { Ok(()) }
    }

    fn user(&self, id: &UserId) -> Result<&UserRef, SimServerError> {
        self.users.get(id).ok_or_else(|| SimServerError::UnknownUser(id.clone()))
    }

    fn participant_of(
        &mut self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<&mut StoredConversation, SimServerError> {
        let stored = self
            .conversations
            .get_mut(conversation)
            .ok_or_else(|| SimServerError::UnknownConversation(conversation.clone()))?;
        if !stored.participants.contains(user) {
            return Err(SimServerError::NotParticipant {
                user: user.clone(),
                conversation: conversation.clone(),
            });
        }
        Ok(stored)
    }

    fn allocate_conversation(
        &mut self,
        participants: BTreeSet<UserId>,
        group_name: Option<String>,
        now: Timestamp,
    ) -> ConversationId {
        self.next_conversation += 1;
        let id = ConversationId::new(format!("c{}", self.next_conversation));
        self.conversations.insert(id.clone(), StoredConversation {
            participants,
            group_name,
            messages: Vec::new(),
            unread: BTreeMap::new(),
            updated_at: now,
        });
        id
    }

    fn conversation_view(&self, user: &UserId, id: &ConversationId) -> Result<Conversation, SimServerError> {
        let stored =
            self.conversations.get(id).ok_or_else(|| SimServerError::UnknownConversation(id.clone()))?;

        let mut view = Conversation::new(id.clone(), stored.updated_at)
            .with_unread(stored.unread.get(user).copied().unwrap_or(0));
        for participant in &stored.participants {
            view = view.with_participant(self.user(participant)?.clone());
        }
        if let Some(name) = &stored.group_name {
            view = view.with_group_name(name.clone());
        }
        view.last_message = stored.messages.last().map(Message::summary);
        Ok(view)
    }

    fn connected_except(&self, user: &UserId) -> Vec<UserId> {
        self.links
            .iter()
            .filter(|(id, link)| *id != user && link.connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn push_to<'a>(
        &mut self,
        recipients: impl Iterator<Item = &'a UserId>,
        event: &PushEvent,
    ) -> Result<(), SimServerError> {
        let frame = event.encode().map_err(|e| SimServerError::BadFrame(e.to_string()))?;
        for recipient in recipients {
            if let Some(link) = self.links.get_mut(recipient)
                && link.connected
            {
                link.inbox.push_back(frame.clone());
            }
        }
        Ok(())
    }
}
