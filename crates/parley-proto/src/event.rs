//! Realtime channel events.
//!
//! The channel carries named events. A [`ChannelFrame`] is the raw unit: the
//! event name plus a CBOR payload. The name selects the payload type, so the
//! payload holds only the inner struct.
//!
//! # Invariants
//!
//! - Each inbound variant of [`PushEvent`] and each outbound variant of
//!   [`OutboundEvent`] maps to exactly one [`EventName`].
//! - Decoding validates required fields. A decoded event never carries an
//!   empty id.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{ConversationId, Message, ProtocolError, Result, UserId};

/// Maximum payload size accepted from the channel (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Names of events exchanged over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    /// Server → client: a message was created.
    MessageNew,
    /// Both directions: typing state changed.
    Typing,
    /// Server → client: user came online.
    PresenceOnline,
    /// Server → client: user went offline.
    PresenceOffline,
    /// Client → server: subscribe to a conversation's room.
    Join,
}

impl EventName {
    /// All event names.
    pub const ALL: [Self; 5] =
        [Self::MessageNew, Self::Typing, Self::PresenceOnline, Self::PresenceOffline, Self::Join];

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MessageNew => "message:new",
            Self::Typing => "typing",
            Self::PresenceOnline => "presence:online",
            Self::PresenceOffline => "presence:offline",
            Self::Join => "join",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEvent(s.to_owned()))
    }
}

/// Raw event as it travels over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFrame {
    /// Event name.
    pub name: String,
    /// CBOR-encoded payload.
    pub payload: Vec<u8>,
}

impl ChannelFrame {
    /// Create a frame.
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { name: name.into(), payload }
    }
}

/// `typing` payload, server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Conversation where the user is typing.
    pub conversation_id: ConversationId,
    /// Typing user.
    pub user_id: UserId,
    /// Started (`true`) or stopped (`false`) typing.
    pub is_typing: bool,
}

/// `presence:*` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// User whose presence changed.
    pub user_id: UserId,
}

/// `join` payload, client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Conversation room to join.
    pub conversation_id: ConversationId,
}

/// `typing` payload, client → server. The server fills in the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTypingPayload {
    /// Conversation where the local user is typing.
    pub conversation_id: ConversationId,
    /// Started (`true`) or stopped (`false`) typing.
    pub is_typing: bool,
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A message was created.
    MessageNew(Message),
    /// A user's typing state changed.
    Typing(TypingPayload),
    /// A user came online.
    PresenceOnline(PresencePayload),
    /// A user went offline.
    PresenceOffline(PresencePayload),
}

impl PushEvent {
    /// Event name for this variant.
    pub const fn name(&self) -> EventName {
        match self {
            Self::MessageNew(_) => EventName::MessageNew,
            Self::Typing(_) => EventName::Typing,
            Self::PresenceOnline(_) => EventName::PresenceOnline,
            Self::PresenceOffline(_) => EventName::PresenceOffline,
        }
    }

    /// Encode into a channel frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self) -> Result<ChannelFrame> {
        let payload = match self {
            Self::MessageNew(inner) => encode_payload(inner)?,
            Self::Typing(inner) => encode_payload(inner)?,
            Self::PresenceOnline(inner) | Self::PresenceOffline(inner) => encode_payload(inner)?,
        };
        Ok(ChannelFrame::new(self.name().as_str(), payload))
    }

    /// Decode and validate a frame received from the server.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEvent` if the name is not part of the protocol
    /// - `ProtocolError::WrongDirection` for client-only events
    /// - `ProtocolError::PayloadTooLarge` / `CborDecode` for bad payloads
    /// - `ProtocolError::MissingField` if a required id is empty
    pub fn decode(frame: &ChannelFrame) -> Result<Self> {
        let name: EventName = frame.name.parse()?;
        let event = match name {
            EventName::MessageNew => {
                let message: Message = decode_payload(&frame.payload)?;
                message.validate()?;
                Self::MessageNew(message)
            },
            EventName::Typing => {
                let typing: TypingPayload = decode_payload(&frame.payload)?;
                require(typing.conversation_id.is_empty(), "conversationId")?;
                require(typing.user_id.is_empty(), "userId")?;
                Self::Typing(typing)
            },
            EventName::PresenceOnline | EventName::PresenceOffline => {
                let presence: PresencePayload = decode_payload(&frame.payload)?;
                require(presence.user_id.is_empty(), "userId")?;
                if name == EventName::PresenceOnline {
                    Self::PresenceOnline(presence)
                } else {
                    Self::PresenceOffline(presence)
                }
            },
            EventName::Join => {
                return Err(ProtocolError::WrongDirection {
                    event: name.as_str(),
                    direction: "server to client",
                });
            },
        };
        Ok(event)
    }
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Join a conversation's room.
    Join(JoinPayload),
    /// Local typing state changed.
    Typing(LocalTypingPayload),
}

impl OutboundEvent {
    /// `join` for a conversation.
    pub fn join(conversation_id: ConversationId) -> Self {
        Self::Join(JoinPayload { conversation_id })
    }

    /// `typing` for a conversation.
    pub fn typing(conversation_id: ConversationId, is_typing: bool) -> Self {
        Self::Typing(LocalTypingPayload { conversation_id, is_typing })
    }

    /// Event name for this variant.
    pub const fn name(&self) -> EventName {
        match self {
            Self::Join(_) => EventName::Join,
            Self::Typing(_) => EventName::Typing,
        }
    }

    /// Conversation the event refers to.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Join(inner) => &inner.conversation_id,
            Self::Typing(inner) => &inner.conversation_id,
        }
    }

    /// Encode into a channel frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self) -> Result<ChannelFrame> {
        let payload = match self {
            Self::Join(inner) => encode_payload(inner)?,
            Self::Typing(inner) => encode_payload(inner)?,
        };
        Ok(ChannelFrame::new(self.name().as_str(), payload))
    }

    /// Decode a frame emitted by a client (server side of the channel).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEvent` if the name is not part of the protocol
    /// - `ProtocolError::WrongDirection` for server-only events
    /// - `ProtocolError::PayloadTooLarge` / `CborDecode` for bad payloads
    /// - `ProtocolError::MissingField` if the conversation id is empty
    pub fn decode(frame: &ChannelFrame) -> Result<Self> {
        let name: EventName = frame.name.parse()?;
        let event = match name {
            EventName::Join => Self::Join(decode_payload(&frame.payload)?),
            EventName::Typing => Self::Typing(decode_payload(&frame.payload)?),
            EventName::MessageNew | EventName::PresenceOnline | EventName::PresenceOffline => {
                return Err(ProtocolError::WrongDirection {
                    event: name.as_str(),
                    direction: "client to server",
                });
            },
        };
        require(event.conversation_id().is_empty(), "conversationId")?;
        Ok(event)
    }
}

fn require(missing: bool, field: &'static str) -> Result<()> {
    if missing { Err(ProtocolError::MissingField(field)) } else { Ok(()) }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Size is checked before the CBOR parser sees the bytes.
fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
    }
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timestamp;

    #[test]
    fn event_names_parse_back() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>(), Ok(name));
        }
        assert!(matches!("message:old".parse::<EventName>(), Err(ProtocolError::UnknownEvent(_))));
    }

    #[test]
    fn message_new_decodes() {
        let msg = Message::confirmed("m1", "c1", "u1", "hi", Timestamp::from_millis(5));
        let frame = PushEvent::MessageNew(msg.clone()).encode().unwrap();

        assert_eq!(frame.name, "message:new");
        assert_eq!(PushEvent::decode(&frame).unwrap(), PushEvent::MessageNew(msg));
    }

    #[test]
    fn message_without_id_is_rejected() {
        let msg = Message::confirmed("", "c1", "u1", "hi", Timestamp::from_millis(5));
        let frame = PushEvent::MessageNew(msg).encode().unwrap();

        assert_eq!(PushEvent::decode(&frame), Err(ProtocolError::MissingField("id")));
    }

    #[test]
    fn join_is_not_a_push_event() {
        let frame = OutboundEvent::join(ConversationId::from("c1")).encode().unwrap();
        assert!(matches!(PushEvent::decode(&frame), Err(ProtocolError::WrongDirection { .. })));
        assert!(OutboundEvent::decode(&frame).is_ok());
    }

    #[test]
    fn oversized_payload_is_rejected_before_parsing() {
        let frame = ChannelFrame::new("typing", vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(PushEvent::decode(&frame), Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let frame = ChannelFrame::new("message:new", vec![0xff, 0x00, 0x13]);
        assert!(matches!(PushEvent::decode(&frame), Err(ProtocolError::CborDecode(_))));
    }
}
