//! Injected dependencies shared across components.

use chrono::{DateTime, Utc};

/// Clock trait, abstracting time for testability.
///
/// Production uses [`SystemClock`]; tests pin a fixed instant so timestamps
/// and quest expiry are deterministic.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
