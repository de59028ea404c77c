//! Property-based tests for the SyncEngine.
//!
//! Arbitrary interleavings of user commands, push events, and request
//! completions must never break the ordering and uniqueness guarantees of the
//! stores.

use std::collections::HashSet;

use parley_app::{SyncAction, SyncConfig, SyncEngine, SyncEvent};
use parley_core::SessionCredentials;
use parley_proto::{Conversation, Message, MessageId, PushEvent, Timestamp, UserId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Select(u8),
    Send(u8),
    Push { conv: u8, seq: u16, sender: u8, at: u64 },
    Loaded { conv: u8, stale: bool },
    Confirm(u8),
    Fail(u8),
    Tick(u64),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        1 => (0u8..3).prop_map(Step::Select),
        2 => (0u8..4).prop_map(Step::Send),
        3 => (0u8..4, 0u16..40, 0u8..3, 0u64..20_000)
            .prop_map(|(conv, seq, sender, at)| Step::Push { conv, seq, sender, at }),
        1 => (0u8..3, any::<bool>()).prop_map(|(conv, stale)| Step::Loaded { conv, stale }),
        2 => (0u8..8).prop_map(Step::Confirm),
        1 => (0u8..8).prop_map(Step::Fail),
        1 => (0u64..3_000).prop_map(Step::Tick),
    ]
}

fn conv(i: u8) -> String {
    format!("c{i}")
}

fn sender(i: u8) -> UserId {
    if i == 0 { UserId::from("me") } else { UserId::from(format!("u{i}")) }
}

/// In-flight durable sends, keyed by temp id.
type Inflight = Vec<(MessageId, String, String)>;

fn record_posts(actions: &[SyncAction], inflight: &mut Inflight) {
    for action in actions {
        if let SyncAction::PostMessage { conversation_id, content, temp_id } = action {
            inflight.push((temp_id.clone(), conversation_id.to_string(), content.clone()));
        }
    }
}

proptest! {
    #[test]
    fn prop_engine_keeps_store_guarantees(steps in prop::collection::vec(step_strategy(), 0..60)) {
        let mut engine = SyncEngine::new(SyncConfig::default(), UserId::from("me"), SessionCredentials::default());
        let mut now = 1_000;
        let mut inflight: Inflight = Vec::new();
        let mut server_seq = 0u32;

        engine.start(Timestamp::from_millis(now));
        engine.handle(SyncEvent::ChannelOpened, Timestamp::from_millis(now));
        engine.handle(
            SyncEvent::ConversationsLoaded((0..3).map(|i| Conversation::new(conv(i), Timestamp::from_millis(500))).collect()),
            Timestamp::from_millis(now),
        );

        for step in steps {
            now += 10;
            let ts = Timestamp::from_millis(now);
            match step {
                Step::Select(i) => {
                    engine.set_active_conversation(conv(i).into(), ts);
                },
                Step::Send(text) => {
                    if let Ok(actions) = engine.send_message(format!("text {text}"), ts) {
                        record_posts(&actions, &mut inflight);
                    }
                },
                Step::Push { conv: c, seq, sender: s, at } => {
                    let message = Message::confirmed(format!("p{seq}"), conv(c), sender(s), "hey", Timestamp::from_millis(at));
                    let frame = PushEvent::MessageNew(message).encode().unwrap();
                    engine.handle(SyncEvent::ChannelFrame(frame), ts);
                },
                Step::Loaded { conv: c, stale } => {
                    let generation = if stale { engine.generation().saturating_sub(1) } else { engine.generation() };
                    let messages = (0..3u64)
                        .map(|n| Message::confirmed(format!("h{c}-{n}"), conv(c), "u1", "old", Timestamp::from_millis(100 + n)))
                        .collect();
                    engine.handle(SyncEvent::MessagesLoaded { conversation_id: conv(c).into(), generation, messages }, ts);
                },
                Step::Confirm(i) => {
                    if inflight.is_empty() {
                        continue;
                    }
                    let (temp_id, conversation_id, content) = inflight.remove(usize::from(i) % inflight.len());
                    server_seq += 1;
                    let message = Message::confirmed(format!("s{server_seq}"), conversation_id, "me", content, ts);
                    let frame = PushEvent::MessageNew(message.clone()).encode().unwrap();
                    if i % 2 == 0 {
                        engine.handle(SyncEvent::ChannelFrame(frame.clone()), ts);
                        engine.handle(SyncEvent::MessageSent { temp_id, message }, ts);
                    } else {
                        engine.handle(SyncEvent::MessageSent { temp_id, message }, ts);
                        engine.handle(SyncEvent::ChannelFrame(frame), ts);
                    }
                },
                Step::Fail(i) => {
                    if inflight.is_empty() {
                        continue;
                    }
                    let (temp_id, _, _) = inflight.remove(usize::from(i) % inflight.len());
                    engine.handle(SyncEvent::MessageSendFailed { temp_id, error: "503".into() }, ts);
                },
                Step::Tick(advance) => {
                    now += advance;
                    engine.tick(Timestamp::from_millis(now));
                },
            }

            let messages = engine.messages().messages();
            prop_assert!(messages.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
            let ids: HashSet<_> = messages.iter().map(|m| &m.id).collect();
            prop_assert_eq!(ids.len(), messages.len());
            prop_assert!(messages.iter().all(|m| Some(&m.conversation_id) == engine.active_conversation()));

            let conversations = engine.conversations().conversations();
            let ranked = conversations.windows(2).all(|w| {
                w[0].updated_at > w[1].updated_at || (w[0].updated_at == w[1].updated_at && w[0].id < w[1].id)
            });
            prop_assert!(ranked, "conversation list out of order");
            if let Some(active) = engine.active_conversation() {
                prop_assert_eq!(engine.conversations().unread_count(active), Some(0));
            }
        }
    }
}
