//! Fuzz target for the sync engine
//!
//! # Strategy
//!
//! Arbitrary interleavings of user commands, raw channel frames, request
//! completions (including stale generations), connection drops, and clock
//! jumps fed to one engine.
//!
//! # Invariants
//!
//! - The message view only holds the active conversation
//! - The active conversation never shows unread messages
//! - The conversation list stays ordered by recency, ties by id
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_app::{SyncAction, SyncConfig, SyncEngine, SyncEvent, UserCommand};
use parley_core::SessionCredentials;
use parley_proto::{ChannelFrame, Conversation, ConversationId, EventName, Message, PushEvent, Timestamp, UserId};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Select(u8),
    Send(u8),
    Typing(bool),
    Frame { name: u8, payload: Vec<u8> },
    Push { id: u8, conv: u8, sender: u8, at: u16 },
    Loaded { conv: u8, generation_offset: u8 },
    ConversationsLoaded(Vec<(u8, u16, u8)>),
    Sent { seq: u8, id: u8 },
    SendFailed { seq: u8 },
    Opened,
    Closed,
    Tick(u16),
}

fn conv(index: u8) -> ConversationId {
    ConversationId::from(format!("c{}", index % 4))
}

fn user(index: u8) -> UserId {
    if index % 3 == 0 { UserId::from("me") } else { UserId::from(format!("u{}", index % 3)) }
}

fuzz_target!(|inputs: Vec<Input>| {
    let mut engine = SyncEngine::new(SyncConfig::default(), UserId::from("me"), SessionCredentials::default());
    let mut now = 1_000u64;
    let mut posted: Vec<(parley_proto::MessageId, ConversationId)> = Vec::new();
    engine.start(Timestamp::from_millis(now));

    for input in inputs {
        now += 1;
        let ts = Timestamp::from_millis(now);
        let actions = match input {
            Input::Select(c) => engine.apply_command(UserCommand::SelectConversation(conv(c)), ts),
            Input::Send(t) => engine.apply_command(UserCommand::SendMessage(format!("text {t}")), ts),
            Input::Typing(on) => engine.apply_command(UserCommand::Typing(on), ts),
            Input::Frame { name, payload } => {
                let name = EventName::ALL[usize::from(name) % EventName::ALL.len()];
                engine.handle(SyncEvent::ChannelFrame(ChannelFrame::new(name.as_str(), payload)), ts)
            },
            Input::Push { id, conv: c, sender, at } => {
                let message =
                    Message::confirmed(format!("m{id}"), conv(c), user(sender), "hi", Timestamp::from_millis(u64::from(at)));
                match PushEvent::MessageNew(message).encode() {
                    Ok(frame) => engine.handle(SyncEvent::ChannelFrame(frame), ts),
                    Err(_) => continue,
                }
            },
            Input::Loaded { conv: c, generation_offset } => {
                let generation = engine.generation().saturating_sub(u64::from(generation_offset % 2));
                let messages =
                    (0..3u64).map(|n| Message::confirmed(format!("h{n}"), conv(c), "u1", "old", Timestamp::from_millis(n))).collect();
                engine.handle(SyncEvent::MessagesLoaded { conversation_id: conv(c), generation, messages }, ts)
            },
            Input::ConversationsLoaded(rows) => {
                let conversations = rows
                    .into_iter()
                    .map(|(c, at, unread)| {
                        Conversation::new(conv(c), Timestamp::from_millis(u64::from(at))).with_unread(u32::from(unread))
                    })
                    .collect();
                engine.handle(SyncEvent::ConversationsLoaded(conversations), ts)
            },
            Input::Sent { seq, id } => {
                if posted.is_empty() {
                    continue;
                }
                let (temp_id, conversation_id) = posted.remove(usize::from(seq) % posted.len());
                let message = Message::confirmed(format!("s{id}"), conversation_id, "me", "text", ts);
                engine.handle(SyncEvent::MessageSent { temp_id, message }, ts)
            },
            Input::SendFailed { seq } => {
                if posted.is_empty() {
                    continue;
                }
                let (temp_id, _) = posted.remove(usize::from(seq) % posted.len());
                engine.handle(SyncEvent::MessageSendFailed { temp_id, error: "timeout".into() }, ts)
            },
            Input::Opened => engine.handle(SyncEvent::ChannelOpened, ts),
            Input::Closed => engine.handle(SyncEvent::ChannelClosed { reason: "fuzz".into() }, ts),
            Input::Tick(advance) => {
                now += u64::from(advance);
                engine.tick(Timestamp::from_millis(now))
            },
        };

        for action in actions {
            if let SyncAction::PostMessage { conversation_id, temp_id, .. } = action {
                posted.push((temp_id, conversation_id));
            }
        }

        let messages = engine.messages().messages();
        assert!(messages.iter().all(|m| Some(&m.conversation_id) == engine.active_conversation()));
        assert!(messages.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
        let conversations = engine.conversations().conversations();
        assert!(conversations.windows(2).all(|w| {
            w[0].updated_at > w[1].updated_at || (w[0].updated_at == w[1].updated_at && w[0].id < w[1].id)
        }));
        if let Some(active) = engine.active_conversation() {
            assert!(engine.conversations().unread_count(active).is_none_or(|unread| unread == 0));
        }
    }
});
