//! Wall-clock abstraction so expiry logic is testable with simulated time.

use parking_lot::Mutex;
use std::sync::Arc;

/// Source of "now" in Unix milliseconds.
///
/// All persisted timestamps in the shared store are millisecond values from
/// this clock, rendered as decimal strings.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually-driven clock for tests. Cloning shares the underlying instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<i64>>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Move the clock forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        *self.now.lock() += delta_ms;
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, now_ms: i64) {
        *self.now.lock() = now_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        *self.now.lock()
    }
}
