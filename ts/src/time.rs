//! Timestamp helper shared by every `Record` implementor.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds.
///
/// Every `Record`'s `created_at`/`updated_at` is stamped with this, so
/// `Store` and its callers never need a second notion of "now".
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
