//! Time sources for the eligibility engine.
//!
//! Throttle limits are tracked against local time (so "wait until" reasons
//! read naturally in logs) while campaign windows compare against UTC, since
//! start/end dates arrive as UTC epoch milliseconds.

use chrono::{DateTime, Duration, FixedOffset, Local, Offset, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now_local(&self) -> DateTime<FixedOffset>;
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and deterministic replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_offset(now, Utc.fix())
    }

    /// A clock whose local zone is `offset` away from UTC.
    pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_local(&self) -> DateTime<FixedOffset> {
        self.now.lock().with_timezone(&self.offset)
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
