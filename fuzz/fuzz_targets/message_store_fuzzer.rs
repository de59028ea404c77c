//! Fuzz target for message store reconciliation
//!
//! # Strategy
//!
//! Arbitrary sequences of optimistic appends, pushed messages, send
//! confirmations, failures, snapshots, and scope resets with colliding ids,
//! contents and timestamps.
//!
//! # Invariants
//!
//! - Messages stay strictly ordered by (created at, id)
//! - No id appears twice
//! - Every message belongs to the store's conversation
//! - NEVER panic

#![no_main]

use std::{collections::HashSet, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::MessageStore;
use parley_proto::{ConversationId, Message, MessageId, Timestamp};

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Reset { conv: u8 },
    Append { seq: u8, sender: u8, text: u8, at: u16 },
    Incoming { id: u8, conv: u8, sender: u8, text: u8, at: u16 },
    Confirm { seq: u8, id: u8, sender: u8, text: u8, at: u16 },
    Discard { seq: u8 },
    Snapshot { conv: u8, ids: Vec<(u8, u16)> },
}

fn conv(index: u8) -> ConversationId {
    ConversationId::from(format!("c{}", index % 3))
}

fn sender(index: u8) -> String {
    format!("u{}", index % 3)
}

fn text(index: u8) -> String {
    format!("t{}", index % 4)
}

fn at(ms: u16) -> Timestamp {
    Timestamp::from_millis(u64::from(ms))
}

fn confirmed(id: u8, conv: ConversationId, sender_index: u8, text_index: u8, ms: u16) -> Message {
    Message::confirmed(format!("m{id}"), conv, sender(sender_index), text(text_index), at(ms))
}

fuzz_target!(|input: (u16, Vec<Op>)| {
    let (tolerance, ops) = input;
    let mut store = MessageStore::new(Duration::from_millis(u64::from(tolerance)));

    for op in ops {
        match op {
            Op::Reset { conv: c } => store.reset(Some(conv(c))),
            Op::Append { seq, sender: s, text: t, at: ms } => {
                let Some(scope) = store.conversation_id().cloned() else {
                    continue;
                };
                let _ = store.append_optimistic(Message::optimistic(
                    MessageId::local(u64::from(seq)),
                    scope,
                    sender(s),
                    text(t),
                    at(ms),
                ));
            },
            Op::Incoming { id, conv: c, sender: s, text: t, at: ms } => {
                let _ = store.reconcile_incoming(confirmed(id, conv(c), s, t, ms));
            },
            Op::Confirm { seq, id, sender: s, text: t, at: ms } => {
                let Some(scope) = store.conversation_id().cloned() else {
                    continue;
                };
                let _ = store.confirm_pending(&MessageId::local(u64::from(seq)), confirmed(id, scope, s, t, ms));
            },
            Op::Discard { seq } => {
                let _ = store.discard_pending(&MessageId::local(u64::from(seq)));
            },
            Op::Snapshot { conv: c, ids } => {
                let scope = conv(c);
                let messages = ids.into_iter().map(|(id, ms)| confirmed(id, scope.clone(), id, id, ms)).collect();
                let _ = store.load_snapshot(scope, messages);
            },
        }

        let messages = store.messages();
        assert!(messages.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
        let ids: HashSet<_> = messages.iter().map(|m| &m.id).collect();
        assert_eq!(ids.len(), messages.len());
        assert!(messages.iter().all(|m| Some(&m.conversation_id) == store.conversation_id()));
    }
});
