//! Wall-clock seam so TTL arithmetic stays testable.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::lock::mutex_lock;

/// Source of the current wall-clock time.
///
/// Cache expiry, derivative-file aging, and request timing all read time
/// through this trait; tests substitute [`ManualClock`] to simulate elapsed
/// seconds without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Production clock backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: SystemTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(base: SystemTime) -> Self {
        Self {
            base,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Start at the real current time; subsequent reads stay frozen until
    /// advanced.
    pub fn starting_now() -> Self {
        Self::new(SystemTime::now())
    }

    /// Move the clock forward by the given amount.
    pub fn advance(&self, by: Duration) {
        *mutex_lock(&self.offset, "util::clock", "advance") += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.base + *mutex_lock(&self.offset, "util::clock", "now")
    }
}

/// Seconds since the Unix epoch, saturating at zero for pre-epoch instants.
pub fn unix_seconds(instant: SystemTime) -> u64 {
    instant
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
