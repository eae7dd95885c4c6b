//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as unix milliseconds.
///
/// Timestamps in the store are plain `u64` millis so they serialize
/// without a dedicated datetime dependency and compare cheaply.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
