//! Time source for version timestamps.
//!
//! Stores read "now" through the [`Clock`] trait so tests can pin time with
//! [`FixedClock`]. Strict monotonicity of `updated` is not the clock's job;
//! see [`crate::guard::next_updated`].

use std::fmt::Debug;

#[cfg(any(test, feature = "testing"))]
use std::sync::Mutex;

use crate::types::Timestamp;

/// A time provider for record timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Production clock using real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(chrono::Utc::now().timestamp_millis())
    }
}

/// Manually driven clock for tests.
///
/// Time only moves when [`advance`](FixedClock::advance) or
/// [`set`](FixedClock::set) is called.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug)]
pub struct FixedClock {
    millis: Mutex<i64>,
}

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    pub fn new(millis: i64) -> Self {
        FixedClock {
            millis: Mutex::new(millis),
        }
    }

    pub fn advance(&self, ms: i64) {
        *self.millis.lock().unwrap() += ms;
    }

    pub fn set(&self, ms: i64) {
        *self.millis.lock().unwrap() = ms;
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(*self.millis.lock().unwrap())
    }
}
