//! Timeout values accepted by every blocking adapter operation

use std::time::{Duration, Instant};

/// How long a blocking call may suspend the caller
///
/// A zero timeout coming from the transport engine means "block
/// indefinitely", so [`Wait::from_micros`] maps `0` to [`Wait::Forever`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wait {
    /// Block until the event happens
    Forever,
    /// Block at most this long
    For(Duration),
}

impl Wait {
    /// Convert a microsecond timeout where `0` means forever
    pub fn from_micros(us: u64) -> Self {
        if us == 0 {
            Wait::Forever
        } else {
            Wait::For(Duration::from_micros(us))
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::from_micros(ms.saturating_mul(1000))
    }

    /// Monotonic deadline measured from now
    ///
    /// `None` for [`Wait::Forever`] and for durations too large to represent.
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Wait::Forever => None,
            Wait::For(duration) => Instant::now().checked_add(duration),
        }
    }

    /// The bounded duration, `None` for [`Wait::Forever`]
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Wait::Forever => None,
            Wait::For(duration) => Some(duration),
        }
    }
}

impl From<Duration> for Wait {
    fn from(duration: Duration) -> Self {
        Wait::For(duration)
    }
}
