//! Scripted session against an in-process server.
//!
//! Seeds a [`parley_harness::SimServer`] with the local user, one peer, and a
//! shared group, then plays a script through the production
//! [`parley_app::Runtime`].

use std::time::Duration;

use parley_app::{Runtime, StateChange, SyncConfig, SyncEngine, UserCommand};
use parley_core::{Environment, SessionCredentials};
use parley_harness::{
    InvariantRegistry, ScriptStep, SimDriver, SimDriverError, SimServerError, create_shared_server,
};
use parley_proto::{UserId, UserRef};
use thiserror::Error;

/// Pause between a keystroke burst and the send.
const COMPOSE_DELAY: Duration = Duration::from_millis(400);

/// Session failures.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The simulated server refused the seed data.
    #[error("seeding server: {0}")]
    Seed(#[from] SimServerError),
    /// The driver failed mid-session.
    #[error(transparent)]
    Driver(#[from] SimDriverError),
    /// The server lock was poisoned.
    #[error("server lock poisoned")]
    Poisoned,
}

/// What the scripted user does.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Local user handle.
    pub user: String,
    /// Peer sharing the group.
    pub peer: String,
    /// Messages sent to the group, in order.
    pub messages: Vec<String>,
    /// Also open a direct conversation with the peer.
    pub direct: bool,
}

/// Outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Conversation titles and unread counters, in list order.
    pub conversations: Vec<(String, u32)>,
    /// Sender and content of the messages in the final view.
    pub transcript: Vec<(UserId, String)>,
    /// State changes delivered to the frontend.
    pub notifications: usize,
    /// Commands the engine rejected.
    pub rejected: usize,
}

/// Run `plan` to completion on `env`.
pub async fn run_session<E: Environment>(
    plan: &SessionPlan,
    config: SyncConfig,
    env: E,
) -> Result<SessionReport, SessionError> {
    let user = UserId::from(plan.user.as_str());
    let peer = UserId::from(plan.peer.as_str());

    let server = create_shared_server();
    let group = {
        let mut guard = server.lock().map_err(|_| SessionError::Poisoned)?;
        guard.add_user(UserRef::new(user.clone(), plan.user.clone(), display_name(&plan.user)));
        guard.add_user(UserRef::new(peer.clone(), plan.peer.clone(), display_name(&plan.peer)));
        let group = guard.create_group("general", &[user.clone(), peer.clone()], env.now())?;
        guard.post_message(&peer, &group, "welcome to parley", env.now())?;
        group
    };

    let mut script = vec![ScriptStep::Command(UserCommand::SelectConversation(group))];
    for message in &plan.messages {
        script.push(ScriptStep::Command(UserCommand::Typing(true)));
        script.push(ScriptStep::Advance(COMPOSE_DELAY));
        script.push(ScriptStep::Command(UserCommand::SendMessage(message.clone())));
    }
    if plan.direct {
        script.push(ScriptStep::Command(UserCommand::SearchUsers(plan.peer.clone())));
        script.push(ScriptStep::Command(UserCommand::StartConversation(peer)));
    }
    script.push(ScriptStep::Advance(config.typing_idle));

    let driver = SimDriver::new(server, user.clone(), env)
        .with_invariants(InvariantRegistry::standard())
        .with_script(script);
    let credentials = SessionCredentials::bearer(format!("{}-session", plan.user));
    let mut runtime = Runtime::new(driver, SyncEngine::new(config, user, credentials));

    runtime.run().await?;

    let engine = runtime.engine();
    let notifications = runtime.driver().notifications();
    Ok(SessionReport {
        conversations: engine
            .conversations()
            .conversations()
            .iter()
            .map(|c| (c.title(engine.user_id()), c.unread_count))
            .collect(),
        transcript: engine
            .messages()
            .messages()
            .iter()
            .map(|m| (m.sender_id.clone(), m.content.clone()))
            .collect(),
        notifications: notifications.len(),
        rejected: notifications.iter().filter(|c| matches!(c, StateChange::CommandRejected { .. })).count(),
    })
}

fn display_name(handle: &str) -> String {
    let mut chars = handle.chars();
    chars.next().map(|first| first.to_uppercase().chain(chars).collect()).unwrap_or_default()
}
