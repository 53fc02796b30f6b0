use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;

/// Source of the current time for every expiry comparison
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock of the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to, for deterministic tests of expiry
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts at the current wall clock time
    pub fn starting_now() -> Self {
        Self::new(Timestamp::now())
    }

    /// Moves the clock forward, saturating at the maximum timestamp
    pub fn advance(&self, duration: SignedDuration) {
        let mut now = self.now.lock();
        *now = now.checked_add(duration).unwrap_or(Timestamp::MAX);
    }

    pub fn set(&self, timestamp: Timestamp) {
        *self.now.lock() = timestamp;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
