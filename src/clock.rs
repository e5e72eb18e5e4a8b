//! Time source used by sessions, lockouts and the security log.
//!
//! Everything that compares against "now" takes an `Arc<dyn Clock>` so that
//! expiry and lockout behaviour can be driven with simulated time.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Largest second count `chrono::Duration::seconds` accepts without panicking.
const MAX_DURATION_SECS: i64 = i64::MAX / 1000;

/// A source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock instant.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Convert a configured second count into a `chrono::Duration`, saturating.
pub fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(MAX_DURATION_SECS);
    Duration::seconds(secs.min(MAX_DURATION_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_now();
        let start = clock.now();
        clock.advance(Duration::seconds(60));
        assert_eq!(clock.now() - start, Duration::seconds(60));
    }

    #[test]
    fn manual_clock_set_overrides() {
        let clock = ManualClock::starting_now();
        let target = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn seconds_saturates_on_huge_values() {
        assert_eq!(seconds(90), Duration::seconds(90));
        assert_eq!(seconds(u64::MAX), Duration::seconds(MAX_DURATION_SECS));
    }
}
