//! Time utilities
//!
//! Safe time operations that handle clock errors gracefully.

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before epoch (should never happen).
/// This prevents panics from system time issues.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("System time is before UNIX epoch, using 0 as timestamp");
            std::time::Duration::from_secs(0)
        })
        .as_millis() as u64
}
