//! Identifiers and timestamps.
//!
//! Ids are opaque strings assigned by the server. The only id the client ever
//! mints itself is the temporary id of an optimistic message, which always
//! starts with [`MessageId::LOCAL_PREFIX`].

use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if the id is the empty string (never valid on the wire).
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Conversation identifier.
    ConversationId
);

string_id!(
    /// Message identifier.
    MessageId
);

string_id!(
    /// User identifier.
    UserId
);

impl MessageId {
    /// Prefix reserved for locally generated temporary ids.
    pub const LOCAL_PREFIX: &'static str = "local-";

    /// Temporary id for the `seq`-th optimistic message of a session.
    pub fn local(seq: u64) -> Self {
        Self(format!("{}{seq}", Self::LOCAL_PREFIX))
    }

    /// True if this id was minted locally and is not server-confirmed.
    pub fn is_local(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }
}

/// Milliseconds since the Unix epoch.
///
/// Used for server timestamps and as the engine's clock. Subtraction
/// saturates at zero so a clock that steps backwards never panics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch.
    pub const ZERO: Self = Self(0);

    /// Timestamp from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Smallest timestamp strictly after `self`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Absolute distance between two timestamps.
    pub fn abs_diff(self, other: Self) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
