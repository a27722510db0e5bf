//! Abstraction over wall-clock time, so timers and timestamps can be
//! driven deterministically in tests.
//!
//! Grounded in the teacher's `topgun_core::hlc::ClockSource`/`SystemClock`
//! pair: same shape, narrowed to the one unit (seconds) this spec needs.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of monotonic seconds-since-epoch timestamps.
///
/// `store` timestamps and the `Complex` drain timer are both measured in
/// this unit. Implementations must never go backwards.
pub trait Clock: Send + Sync {
    /// Current time as whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

/// Default clock backed by the real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}
