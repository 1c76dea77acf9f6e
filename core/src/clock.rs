//! Time sources: wall time for persisted timestamps, monotonic
//! milliseconds for client-side reconciliation deadlines.
//!
//! RULE: Nothing outside this module reads the system clock directly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Wall time, used for `created_at` / `decided_at`.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-advanced clock for tests and the seeded simulation.
pub struct ManualClock {
    ms: Mutex<u64>,
    epoch: DateTime<Utc>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            ms: Mutex::new(0),
            epoch: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now),
        }
    }

    /// Advance by `ms` milliseconds. Returns the new reading.
    pub fn advance(&self, ms: u64) -> u64 {
        let mut now = self.ms.lock();
        *now += ms;
        *now
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.epoch + Duration::milliseconds(*self.ms.lock() as i64)
    }

    fn now_ms(&self) -> u64 {
        *self.ms.lock()
    }
}
