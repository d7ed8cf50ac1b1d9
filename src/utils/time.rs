//! Wall-clock helpers for activity timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[inline]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Whether `since_ms` lies more than `max_ms` before `now`.
#[inline]
pub fn is_expired(since_ms: i64, max_ms: i64, now: i64) -> bool {
    now.saturating_sub(since_ms) > max_ms
}
