//! Injectable clock
//!
//! `WorkInProgressTimestamp`, lock TTLs, and `maxTime` deadlines are all
//! wall-clock dependent. Per the spec's "injectable for determinism in
//! tests" requirement for the jitter RNG (§9), the clock is injected the
//! same way so recovery and lock-expiry tests don't depend on real time.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock time, in milliseconds since the epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Real wall-clock time via `chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only advances when told to; used in tests that need to
/// assert on exact `WorkInProgressTimestamp` values or simulate TTL expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at the given time.
    pub fn new(start_millis: i64) -> Self {
        ManualClock {
            millis: AtomicI64::new(start_millis),
        }
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an exact time.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_millis(), 1000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1500);
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let t1 = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let t2 = clock.now_millis();
        assert!(t2 >= t1);
    }
}
