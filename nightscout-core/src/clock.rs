//! Injectable time source.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of "now" for everything time-dependent (OTP windows, expiration, cache purge).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replaying payloads at a fixed instant.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock frozen at the given unix timestamp (seconds).
    pub fn at_timestamp(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_frozen_until_moved() {
        let clock = ManualClock::at_timestamp(1_670_001_615);
        assert_eq!(clock.now().timestamp(), 1_670_001_615);
        assert_eq!(clock.now(), clock.now());

        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now().timestamp(), 1_670_001_645);
    }
}
