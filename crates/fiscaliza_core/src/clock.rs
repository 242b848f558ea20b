//! Creation timestamps.
//!
//! Units and responses are ordered by `created_at`, so two records created
//! in the same microsecond would have no defined order. [`MonotonicClock`]
//! hands out strictly increasing timestamps within a process.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock whose readings never repeat or go backwards.
#[derive(Debug)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    /// Creates a clock following the system time.
    pub fn new() -> Self {
        Self {
            last_micros: AtomicI64::new(i64::MIN),
        }
    }

    /// Creates a clock whose first reading is no earlier than `start`.
    ///
    /// Useful to continue after records stamped by another process.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            last_micros: AtomicI64::new(start.timestamp_micros() - 1),
        }
    }

    /// Returns the next timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let previous = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or(wall);
        let micros = wall.max(previous.saturating_add(1));
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
