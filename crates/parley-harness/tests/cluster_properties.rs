//! Property-based tests for multi-client synchronization.
//!
//! Random interleavings of user activity, partial delivery, time, dropped
//! connections, and server outages. The cluster checks the standard
//! invariants after every delivered input; the properties below check what
//! must hold once everything has settled.

use std::{collections::HashSet, time::Duration};

use parley_app::{SyncConfig, UserCommand};
use parley_core::ChannelState;
use parley_harness::{InvariantRegistry, SimCluster};
use parley_proto::{ConversationId, Timestamp, UserId, UserRef};
use proptest::prelude::*;

const CLIENTS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Select { client: usize, conv: u8 },
    Send { client: usize, text: u8 },
    Typing { client: usize },
    DeliverOne { client: usize },
    Settle,
    Advance(u64),
    Drop { client: usize },
    Outage(bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let client = 0..CLIENTS;
    prop_oneof![
        2 => (client.clone(), 0u8..3).prop_map(|(client, conv)| Op::Select { client, conv }),
        4 => (client.clone(), any::<u8>()).prop_map(|(client, text)| Op::Send { client, text }),
        1 => client.clone().prop_map(|client| Op::Typing { client }),
        4 => client.clone().prop_map(|client| Op::DeliverOne { client }),
        1 => Just(Op::Settle),
        1 => (0u64..4_000).prop_map(Op::Advance),
        1 => client.prop_map(|client| Op::Drop { client }),
        1 => any::<bool>().prop_map(Op::Outage),
    ]
}

fn user(index: usize) -> UserId {
    UserId::from(format!("u{index}"))
}

fn conv(index: u8) -> ConversationId {
    ConversationId::from(format!("c{}", index + 1))
}

/// Three users sharing the three group conversations `c1..c3`.
fn cluster() -> SimCluster {
    let mut cluster = SimCluster::new(Timestamp::from_millis(1_000)).with_invariants(InvariantRegistry::standard());
    for index in 0..CLIENTS {
        let id = user(index);
        cluster.add_client(UserRef::new(id.clone(), id.to_string(), format!("User {index}")), SyncConfig::default());
    }
    let members: Vec<_> = (0..CLIENTS).map(user).collect();
    for name in ["general", "random", "dev"] {
        cluster.server_mut().create_group(name, &members, Timestamp::from_millis(10)).unwrap();
    }
    cluster.start_all();
    cluster
}

fn apply(cluster: &mut SimCluster, op: Op) {
    match op {
        Op::Select { client, conv: c } => cluster.command(client, UserCommand::SelectConversation(conv(c))),
        Op::Send { client, text } => cluster.command(client, UserCommand::SendMessage(format!("msg {text}"))),
        Op::Typing { client } => cluster.command(client, UserCommand::Typing(true)),
        Op::DeliverOne { client } => {
            cluster.deliver_one(client);
        },
        Op::Settle => {
            cluster.settle();
        },
        Op::Advance(ms) => cluster.advance(Duration::from_millis(ms)),
        Op::Drop { client } => cluster.drop_channel(client),
        Op::Outage(down) => cluster.server_mut().set_unavailable(down),
    }
}

/// Bring the server back, wait out every reconnect backoff, and settle.
fn recover(cluster: &mut SimCluster) {
    cluster.server_mut().set_unavailable(false);
    cluster.settle();
    cluster.advance(Duration::from_secs(60));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Once settled, no send is left pending and every shown message exists
    /// on the server.
    #[test]
    fn prop_settled_views_hold_only_server_messages(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let mut cluster = cluster();
        for op in ops {
            apply(&mut cluster, op);
        }
        recover(&mut cluster);

        for index in 0..CLIENTS {
            let engine = cluster.engine(index);
            prop_assert_eq!(engine.messages().pending_count(), 0);
            prop_assert_eq!(engine.connection_state(), ChannelState::Connected);

            if let Some(active) = engine.active_conversation() {
                let stored: HashSet<_> = cluster.server().stored_messages(active).iter().map(|m| &m.id).collect();
                for message in engine.messages().messages() {
                    prop_assert!(stored.contains(&message.id), "client {} shows unknown {}", index, message.id);
                }
            }
        }
    }

    /// Every stored message was authored exactly once: no send is posted
    /// twice, whatever the delivery order.
    #[test]
    fn prop_each_send_is_stored_at_most_once(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let mut cluster = cluster();
        let mut sends = 0usize;
        for op in ops {
            if matches!(op, Op::Send { .. }) {
                sends += 1;
            }
            apply(&mut cluster, op);
        }
        recover(&mut cluster);

        let stored: usize = (0..3).map(|c| cluster.server().stored_messages(&conv(c)).len()).sum();
        prop_assert!(stored <= sends);
    }

    /// Re-selecting a conversation after recovery converges every client on
    /// the server's message list.
    #[test]
    fn prop_reselect_converges_on_server_state(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let mut cluster = cluster();
        for op in ops {
            apply(&mut cluster, op);
        }
        recover(&mut cluster);

        for index in 0..CLIENTS {
            cluster.command_and_settle(index, UserCommand::SelectConversation(conv(0)));
            cluster.command_and_settle(index, UserCommand::SelectConversation(conv(1)));

            let shown: Vec<_> = cluster.engine(index).messages().messages().iter().map(|m| m.id.clone()).collect();
            let mut stored = cluster.server().stored_messages(&conv(1)).to_vec();
            stored.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
            let stored: Vec<_> = stored.into_iter().map(|m| m.id).collect();
            prop_assert_eq!(shown, stored);
            prop_assert_eq!(cluster.engine(index).conversations().unread_count(&conv(1)), Some(0));
        }
    }
}
