//! Virtual clock for deterministic simulation.
//!
//! Time only moves when a test advances it or a driver sleeps, so typing
//! expiry and reconnect backoff play out identically on every run.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parley_core::Environment;
use parley_proto::Timestamp;

/// Environment backed by a shared virtual clock.
///
/// Clones share the clock.
#[derive(Debug, Clone, Default)]
pub struct SimEnv {
    millis: Arc<AtomicU64>,
}

impl SimEnv {
    /// Clock starting at the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock starting at `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        Self { millis: Arc::new(AtomicU64::new(start.as_millis())) }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) -> Timestamp {
        let delta = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let previous = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ms| Some(ms.saturating_add(delta)))
            .unwrap_or_else(|ms| ms);
        Timestamp::from_millis(previous.saturating_add(delta))
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::starting_at(Timestamp::from_millis(1_000));
        let other = env.clone();

        assert_eq!(env.advance(Duration::from_millis(250)), Timestamp::from_millis(1_250));
        assert_eq!(other.now(), Timestamp::from_millis(1_250));
    }

    #[test]
    fn sleep_advances_virtual_time() {
        let env = SimEnv::new();
        drop(env.sleep(Duration::from_secs(2)));
        assert_eq!(env.now(), Timestamp::from_millis(2_000));
    }
}
