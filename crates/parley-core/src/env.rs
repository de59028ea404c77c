//! Environment abstraction for deterministic testing.
//!
//! Decouples the engine from the system clock. Production uses
//! [`SystemEnv`]; simulation uses a virtual clock that tests advance by hand,
//! so typing expiry and reconnect backoff can be tested without real timers.

use std::{
    future::Future,
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parley_proto::Timestamp;

/// A point in time usable by the sans-IO state machines.
///
/// Implemented for [`Timestamp`] and [`std::time::Instant`].
pub trait Instant:
    Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> Instant for T where
    T: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = T>
{
}

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// - `now()` never goes backwards within one environment (clones included)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> Timestamp;

    /// Sleeps for the specified duration.
    ///
    /// Only used by drivers, never by the state machines.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Production environment backed by the system clock.
///
/// Wall-clock time can step backwards (NTP adjustments). The environment keeps
/// a high-water mark so `now()` stays monotonic.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv {
    high_water: Arc<AtomicU64>,
}

impl SystemEnv {
    /// Create a system environment.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let previous = self.high_water.fetch_max(wall, Ordering::AcqRel);
        Timestamp::from_millis(previous.max(wall))
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_is_monotonic() {
        let env = SystemEnv::new();
        let first = env.now();
        let second = env.clone().now();
        assert!(second >= first);
        assert!(first > Timestamp::ZERO);
    }

    #[test]
    fn high_water_mark_masks_backwards_steps() {
        let env = SystemEnv::new();
        env.high_water.store(u64::MAX - 1, Ordering::Release);
        assert_eq!(env.now(), Timestamp::from_millis(u64::MAX - 1));
    }
}
