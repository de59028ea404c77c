//! Parley CLI entry point.
//!
//! # Usage
//!
//! ```bash
//! # Virtual clock, finishes instantly
//! parley --user alice --peer bob -m "hi" -m "anyone around?"
//!
//! # Wall clock, with engine debug logs
//! RUST_LOG=parley_app=debug parley --realtime --direct
//! ```

#![forbid(unsafe_code)]

mod session;

use std::time::Duration;

use clap::Parser;
use parley_app::SyncConfig;
use parley_core::{ChannelConfig, SystemEnv};
use parley_harness::SimEnv;
use parley_proto::Timestamp;
use session::{SessionPlan, SessionReport, run_session};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Start of the virtual clock (2024-01-01T00:00:00Z).
const SIM_EPOCH: Timestamp = Timestamp::from_millis(1_704_067_200_000);

/// Parley sync engine demo
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Run a scripted messaging session against an in-process server")]
#[command(version)]
struct Args {
    /// Local user handle
    #[arg(short, long, default_value = "alice")]
    user: String,

    /// Peer sharing the group conversation
    #[arg(short, long, default_value = "bob")]
    peer: String,

    /// Message to send to the group (repeatable)
    #[arg(short, long = "message")]
    messages: Vec<String>,

    /// Also open a direct conversation with the peer
    #[arg(long)]
    direct: bool,

    /// Run on the wall clock instead of a virtual one
    #[arg(long)]
    realtime: bool,

    /// Remote typing indicator expiry in milliseconds
    #[arg(long, default_value = "5000")]
    typing_expiry_ms: u64,

    /// Local typing idle timeout in milliseconds
    #[arg(long, default_value = "3000")]
    typing_idle_ms: u64,

    /// Window for matching a send to its echo in milliseconds
    #[arg(long, default_value = "10000")]
    echo_tolerance_ms: u64,

    /// First reconnect delay in milliseconds
    #[arg(long, default_value = "500")]
    initial_backoff_ms: u64,

    /// Reconnect delay cap in milliseconds
    #[arg(long, default_value = "30000")]
    max_backoff_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            typing_expiry: Duration::from_millis(self.typing_expiry_ms),
            typing_idle: Duration::from_millis(self.typing_idle_ms),
            echo_tolerance: Duration::from_millis(self.echo_tolerance_ms),
            channel: ChannelConfig {
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
            ..SyncConfig::default()
        }
    }

    fn plan(&self) -> SessionPlan {
        let messages = if self.messages.is_empty() { vec!["hello".to_owned()] } else { self.messages.clone() };
        SessionPlan { user: self.user.clone(), peer: self.peer.clone(), messages, direct: self.direct }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.sync_config();
    if config.typing_idle >= config.typing_expiry {
        tracing::warn!(
            typing_idle = ?config.typing_idle,
            typing_expiry = ?config.typing_expiry,
            "typing idle should be shorter than expiry"
        );
    }

    tracing::info!(user = %args.user, realtime = args.realtime, "parley session starting");

    let plan = args.plan();
    let report = if args.realtime {
        run_session(&plan, config, SystemEnv::new()).await?
    } else {
        run_session(&plan, config, SimEnv::starting_at(SIM_EPOCH)).await?
    };

    log_report(&report);
    Ok(())
}

fn log_report(report: &SessionReport) {
    for (title, unread) in &report.conversations {
        tracing::info!(%title, unread, "conversation");
    }
    for (sender, content) in &report.transcript {
        tracing::info!(%sender, %content, "message");
    }
    tracing::info!(notifications = report.notifications, rejected = report.rejected, "session finished");
}
