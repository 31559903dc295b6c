//! Injectable time source.
//!
//! Every expiry and cache-header computation reads the current time through a
//! [`Clock`] so tests can pin and advance it.

use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct FakeClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl FakeClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.lock() = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OffsetDateTime> {
        // A poisoned lock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FakeClock {
    /// Starts at a fixed instant so expected values in tests are stable.
    fn default() -> Self {
        Self::new(time::macros::datetime!(2024-01-01 00:00:00 UTC))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> OffsetDateTime {
        *self.lock()
    }
}

/// Shared handle used by the managers and endpoints.
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_only_moves_when_advanced() {
        let clock = FakeClock::default();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(13));
        assert_eq!(clock.now() - start, Duration::seconds(13));
    }

    #[test]
    fn fake_clock_clones_share_time() {
        let clock = FakeClock::default();
        let other = clock.clone();
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn system_clock_is_utc() {
        assert!(SystemClock.now().offset().is_utc());
    }
}
