//! Deterministic time for tests.

use chrono::{DateTime, Duration, Utc};
use questline_core::environment::Clock;
use std::sync::{Arc, Mutex};

/// Fixed clock for deterministic tests.
///
/// Returns the same instant until a test moves it, making timestamps and
/// quest expiry reproducible.
///
/// # Example
///
/// ```
/// use questline_testing::FixedClock;
/// use questline_core::environment::Clock;
/// use chrono::{Duration, Utc};
///
/// let clock = FixedClock::new(Utc::now());
/// let before = clock.now();
/// clock.advance(Duration::seconds(90));
/// assert_eq!(clock.now(), before + Duration::seconds(90));
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Create a new fixed clock at the given time.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Pin the clock to a new instant.
    #[allow(clippy::unwrap_used)] // Test clock: mutex poisoning is a test failure
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock().unwrap() = time;
    }

    /// Move the clock forward (or backward, with a negative duration).
    #[allow(clippy::unwrap_used)] // Test clock: mutex poisoning is a test failure
    pub fn advance(&self, duration: Duration) {
        let mut time = self.time.lock().unwrap();
        *time += duration;
    }
}

impl Clock for FixedClock {
    #[allow(clippy::unwrap_used)] // Test clock: mutex poisoning is a test failure
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}
