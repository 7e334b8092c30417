//! Clock Abstraction
//!
//! Filenames are derived from the current UTC time, so every read of "now"
//! goes through this trait. Production uses the system clock; tests pin the
//! time with `FixedClock` and advance it explicitly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of the current UTC time
///
/// Implementations:
/// - `SystemClock`: real wall-clock time
/// - `FixedClock`: controlled time for tests and simulation
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock using real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance()` or `set()`.
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        FixedClock {
            time: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut time = self.time.lock();
        *time += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.time.lock() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock()
    }
}
