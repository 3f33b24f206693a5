//! Wall-clock source for frame timestamps.

use std::sync::atomic::{AtomicU64, Ordering};

/// Nanosecond wall clock.
pub trait Clock: Send + Sync {
    /// Nanoseconds since the Unix epoch.
    fn now_ns(&self) -> u64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock reading `now_ns`.
    pub fn new(now_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ns),
        }
    }

    /// Jump to `now_ns` (may go backwards).
    pub fn set(&self, now_ns: u64) {
        self.now.store(now_ns, Ordering::Release);
    }

    /// Move forward by `delta_ns`.
    pub fn advance(&self, delta_ns: u64) {
        let _ = self.now.fetch_add(delta_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
