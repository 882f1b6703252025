//! Injected time and id sources.
//!
//! The engine never reads the system clock or mints uuids directly; both go
//! through these traits so tests can pin them.

use chrono::{DateTime, Datelike, Local};
use uuid::Uuid;

/// Monotonic-enough wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Source of fresh scan and message ids.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Random v4 uuids (122 bits of entropy).
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Event-day bucket for a wall-clock instant, in local time.
///
/// `"{day-of-month}{three-letter-month-lowercase}"`, e.g. `14nov`.
/// The day key scopes one-use admission to "today" as the user sees it.
pub fn day_key(now_ms: i64) -> String {
    let utc = DateTime::from_timestamp_millis(now_ms).unwrap_or_default();
    let local = utc.with_timezone(&Local);
    format!(
        "{}{}",
        local.day(),
        local.format("%b").to_string().to_lowercase()
    )
}
