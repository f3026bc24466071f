//! Failure backoff for the article-fetch loop
//!
//! After `k` consecutive failures the next interval is
//! `min(base * 1.5^k, max)`. A success resets `k` to zero.

use std::time::Duration;

/// Compute the next scheduling interval.
#[must_use]
pub fn backoff_interval(base: Duration, error_count: u32, max: Duration) -> Duration {
    if error_count == 0 {
        return base;
    }
    // powi saturates to +inf for large k; min() keeps the cap.
    let scaled = base.as_secs_f64() * 1.5f64.powi(error_count.min(i32::MAX as u32) as i32);
    Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
}
