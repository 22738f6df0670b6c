//! Wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Milliseconds elapsed between `since_ms` and now, saturating at zero.
#[must_use]
pub fn elapsed_since(since_ms: u128) -> Duration {
    let elapsed = now_ms().saturating_sub(since_ms);
    Duration::from_millis(u64::try_from(elapsed).unwrap_or(u64::MAX))
}
