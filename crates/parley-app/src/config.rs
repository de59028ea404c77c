//! Engine configuration.

use std::time::Duration;

use parley_core::{ChannelConfig, messages::DEFAULT_ECHO_TOLERANCE, typing::DEFAULT_TYPING_EXPIRY};

/// Interval between typing sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Keystroke inactivity after which local typing is reported stopped.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(3);

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Expiry window of remote typing entries.
    pub typing_expiry: Duration,
    /// Interval between sweeps of expired typing entries.
    pub sweep_interval: Duration,
    /// Local keystroke idle timeout (should be < `typing_expiry`).
    pub typing_idle: Duration,
    /// Window for matching an optimistic send to its echo.
    pub echo_tolerance: Duration,
    /// Reconnect backoff.
    pub channel: ChannelConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            typing_idle: DEFAULT_TYPING_IDLE,
            echo_tolerance: DEFAULT_ECHO_TOLERANCE,
            channel: ChannelConfig::default(),
        }
    }
}
