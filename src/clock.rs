//! Clock injection, per the decision core's single-source-of-time design
//! note: all age/freshness math runs on one injected `nowMillis`, and
//! tests substitute a fixed value rather than reading the system clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch, as injected `nowMillis`.
    fn now_millis(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(
    /// The millisecond timestamp this clock always reports.
    pub i64,
);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
