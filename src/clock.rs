//! Monotonic wall-clock source
//!
//! Query-time clamping compares wall-clock time against sample timestamps.
//! A clock that jumps backward (NTP adjustment) could widen an already
//! clamped range between retries, so timestamps handed out here never go
//! backward.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock source that guarantees monotonically non-decreasing millisecond
/// timestamps.
#[derive(Debug, Default)]
pub struct QueryClock {
    /// Largest millisecond timestamp handed out so far
    high_water_ms: AtomicI64,
}

impl QueryClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a monotonically non-decreasing unix millisecond timestamp.
    pub fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        loop {
            let prev = self.high_water_ms.load(Ordering::Acquire);
            let ts = wall.max(prev);
            match self.high_water_ms.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue,
            }
        }
    }

    /// Returns the monotonic clock as `chrono::DateTime<Utc>`.
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_else(Utc::now)
    }
}
