//! Clock abstraction shared by the cache, bus, and metric aggregator.
//!
//! Mirrors the `ClockSource` pattern: a trait object so tests can substitute
//! a deterministic clock instead of `std::time::SystemTime`, without forcing
//! every caller to thread a generic parameter through.

use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over wall-clock time for dependency injection.
///
/// All subsystems in this crate read "now" exclusively through a `Clock`, so
/// tests can freeze or fast-forward time deterministically.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Default clock backed by the real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as i64
    }
}

/// Deterministic clock for use across crate test suites.
///
/// Not gated behind `#[cfg(test)]` so that `fluxkit-runtime`'s own tests
/// (a separate crate) can depend on it too.
pub mod testing {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    /// A clock whose value only changes when explicitly told to.
    #[derive(Debug, Clone)]
    pub struct FixedClock(Arc<AtomicI64>);

    impl FixedClock {
        /// Creates a fixed clock plus a handle for advancing it from test code.
        #[must_use]
        pub fn new(initial_millis: i64) -> (Self, Arc<AtomicI64>) {
            let time = Arc::new(AtomicI64::new(initial_millis));
            (Self(Arc::clone(&time)), time)
        }
    }

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_returns_positive() {
        assert!(SystemClock.now_millis() > 0);
    }

    #[test]
    fn fixed_clock_is_controllable() {
        let (clock, time) = testing::FixedClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        time.store(2_000, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(clock.now_millis(), 2_000);
    }
}
