//! Retry backoff for repeated/failing edges.
//!
//! `next_retry = now + rand[0,1) × 2^consecutive_fails × 1000 ms`: a full
//! uniform draw over the whole exponential window, not a fixed base plus a
//! small jitter, so many edges backing off together don't all retry in
//! lockstep.

use rand::Rng;
use rand::RngCore;

const MAX_EXPONENT: u32 = 8; // caps the delay's upper bound at 2^8 * 1000 = 256s.

/// Milliseconds to wait before the next attempt, given the edge's current
/// consecutive-failure count (as tracked in `ExecutionInfo`).
pub fn next_backoff_ms(consecutive_failures: u32, rng: &mut impl RngCore) -> u64 {
    let exponent = consecutive_failures.min(MAX_EXPONENT);
    let window = (1u64 << exponent) as f64 * 1000.0;
    (rng.gen::<f64>() * window) as u64
}
