//! The production runtime loop driven by the simulation driver.

use std::time::Duration;

use parley_app::{Runtime, StateChange, SyncConfig, SyncEngine, UserCommand};
use parley_core::{ChannelState, SessionCredentials};
use parley_harness::{InvariantRegistry, ScriptStep, SharedSimServer, SimDriver, SimEnv, create_shared_server};
use parley_proto::{ConversationId, EventName, OutboundEvent, Timestamp, UserId, UserRef};

fn server_with_team() -> (SharedSimServer, ConversationId) {
    let server = create_shared_server();
    let team = {
        let mut guard = server.lock().unwrap();
        guard.add_user(UserRef::new("alice", "alice", "Alice"));
        guard.add_user(UserRef::new("bob", "bob", "Bob"));
        guard.create_group("team", &[UserId::from("alice"), UserId::from("bob")], Timestamp::from_millis(10)).unwrap()
    };
    (server, team)
}

fn runtime(server: &SharedSimServer, script: Vec<ScriptStep>) -> Runtime<SimDriver> {
    let env = SimEnv::starting_at(Timestamp::from_millis(1_000));
    let driver = SimDriver::new(server.clone(), "alice", env)
        .with_invariants(InvariantRegistry::standard())
        .with_script(script);
    let engine = SyncEngine::new(SyncConfig::default(), UserId::from("alice"), SessionCredentials::bearer("t"));
    Runtime::new(driver, engine)
}

#[tokio::test]
async fn scripted_session_runs_to_completion() {
    let (server, team) = server_with_team();
    let mut runtime = runtime(&server, vec![
        ScriptStep::Command(UserCommand::SelectConversation(team.clone())),
        ScriptStep::Command(UserCommand::SendMessage("hi".into())),
        ScriptStep::Command(UserCommand::Typing(true)),
        ScriptStep::Advance(Duration::from_secs(3)),
    ]);

    runtime.run().await.unwrap();

    let engine = runtime.engine();
    let messages = engine.messages().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hi");
    assert!(!messages[0].pending);
    assert_eq!(engine.connection_state(), ChannelState::Disconnected);

    let driver = runtime.driver();
    assert!(driver.is_stopped());
    assert!(!driver.is_channel_open());

    let emitted: Vec<_> = driver.emitted().iter().map(|frame| OutboundEvent::decode(frame).unwrap()).collect();
    assert_eq!(emitted, vec![
        OutboundEvent::join(team.clone()),
        OutboundEvent::typing(team.clone(), true),
        OutboundEvent::typing(team.clone(), false),
    ]);

    let guard = server.lock().unwrap();
    assert_eq!(guard.message_count(&team), 1);
    assert!(!guard.is_connected(&UserId::from("alice")));
}

#[tokio::test]
async fn dropped_channel_reconnects_and_rejoins() {
    let (server, team) = server_with_team();
    let mut runtime = runtime(&server, vec![
        ScriptStep::Command(UserCommand::SelectConversation(team.clone())),
        ScriptStep::DropChannel,
        ScriptStep::Advance(Duration::from_millis(500)),
    ]);

    runtime.run().await.unwrap();

    let joins =
        runtime.driver().emitted().iter().filter(|frame| frame.name == EventName::Join.as_str()).count();
    assert_eq!(joins, 2);
    let states: Vec<_> = runtime
        .driver()
        .notifications()
        .iter()
        .filter_map(|change| match change {
            StateChange::ConnectionChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states, [
        ChannelState::Connecting,
        ChannelState::Connected,
        ChannelState::Disconnected,
        ChannelState::Connecting,
        ChannelState::Connected,
        ChannelState::Disconnected,
    ]);
}

#[tokio::test]
async fn outage_surfaces_fetch_failure() {
    let (server, _) = server_with_team();
    server.lock().unwrap().set_unavailable(true);
    let mut runtime = runtime(&server, Vec::new());

    runtime.run().await.unwrap();

    let notifications = runtime.driver().notifications();
    assert!(notifications.iter().any(|change| matches!(change, StateChange::FetchFailed { .. })));
    assert!(runtime.engine().conversations().is_empty());
}
