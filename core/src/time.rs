//! Monotonic clock and cooperative sleep primitives.
//!
//! Timing-sensitive components (condition polling, input replay, backoff,
//! the scheduler's idle wait) sleep through `tokio::time`, which is also
//! what lets tests `tokio::time::pause()`/`advance()` instead of burning
//! real wall-clock seconds. This module only adds the couple of helpers the
//! rest of the crate needs on top of that: a millisecond-resolution
//! monotonic timestamp and the current wall-clock time used by the cron
//! layer.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use tokio::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds elapsed since the process's monotonic epoch. Used for
/// `ExecutionInfo.next_retry_time` and deadline math; never compared across
/// processes.
pub fn now_ms() -> i64 {
    EPOCH.elapsed().as_millis() as i64
}

/// Converts a millisecond offset from [`now_ms`]'s epoch back into a
/// `tokio::time::Instant`, for use with `tokio::time::sleep_until`.
pub fn instant_at_ms(ms: i64) -> Instant {
    if ms <= 0 {
        *EPOCH
    } else {
        *EPOCH + std::time::Duration::from_millis(ms as u64)
    }
}

/// Current wall-clock time, used by the cron layer which must
/// reason about calendar offsets, not just monotonic elapsed time.
pub fn wall_now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_nondecreasing() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
