//! Monotonic + wall-clock time source (C1).
//!
//! `now_us()` never goes backwards within a process lifetime. `now_wall_s()`
//! is derived from a settable epoch offset rather than the system clock
//! directly, so a manual time-sync survives independent of whatever the OS
//! clock is doing and is trivially fakeable in tests.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::util::fast_time::FastInstant;

/// Shared monotonic + wall-clock source.
///
/// `wall_offset_us` is `wall_us_at_epoch_set - monotonic_us_at_epoch_set`, so
/// `now_wall_s() = (now_us() + wall_offset_us) / 1_000_000`. Zero means unset.
pub struct TimeSource {
    start: FastInstant,
    wall_offset_us: AtomicI64,
    wall_set: AtomicU64,
}

impl TimeSource {
    pub fn new() -> Self {
        Self {
            start: FastInstant::now(),
            wall_offset_us: AtomicI64::new(0),
            wall_set: AtomicU64::new(0),
        }
    }

    /// A clock rooted at `manual_epoch_s` if non-zero, otherwise unset.
    pub fn with_manual_epoch(manual_epoch_s: u64) -> Self {
        let source = Self::new();
        if manual_epoch_s != 0 {
            source.set_wall_seconds(manual_epoch_s);
        }
        source
    }

    /// Monotonic microseconds since this `TimeSource` was created.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Monotonic milliseconds since this `TimeSource` was created.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }

    /// Wall-clock seconds since epoch, or 0 if never set.
    pub fn now_wall_s(&self) -> u64 {
        if self.wall_set.load(Ordering::Relaxed) == 0 {
            return 0;
        }
        let offset_us = self.wall_offset_us.load(Ordering::Relaxed);
        let now_us = self.now_us() as i64;
        ((now_us + offset_us).max(0) / 1_000_000) as u64
    }

    /// Wall-clock milliseconds since epoch, or 0 if never set.
    pub fn now_wall_ms(&self) -> u64 {
        if self.wall_set.load(Ordering::Relaxed) == 0 {
            return 0;
        }
        let offset_us = self.wall_offset_us.load(Ordering::Relaxed);
        let now_us = self.now_us() as i64;
        ((now_us + offset_us).max(0) / 1_000) as u64
    }

    /// Set the wall clock to `epoch_s` seconds since the Unix epoch.
    pub fn set_wall_seconds(&self, epoch_s: u64) {
        let offset_us = (epoch_s as i64) * 1_000_000 - self.now_us() as i64;
        self.wall_offset_us.store(offset_us, Ordering::Relaxed);
        self.wall_set.store(1, Ordering::Relaxed);
    }

    pub fn is_wall_set(&self) -> bool {
        self.wall_set.load(Ordering::Relaxed) != 0
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn monotonic_never_decreases() {
        let ts = TimeSource::new();
        let a = ts.now_us();
        thread::sleep(Duration::from_millis(5));
        let b = ts.now_us();
        assert!(b > a);
    }

    #[test]
    fn wall_unset_reads_zero() {
        let ts = TimeSource::new();
        assert_eq!(ts.now_wall_s(), 0);
        assert!(!ts.is_wall_set());
    }

    #[test]
    fn set_wall_seconds_then_read() {
        let ts = TimeSource::new();
        ts.set_wall_seconds(1_700_000_000);
        assert!(ts.is_wall_set());
        let read = ts.now_wall_s();
        assert!(read >= 1_700_000_000 && read < 1_700_000_010);
    }

    #[test]
    fn manual_epoch_zero_leaves_unset() {
        let ts = TimeSource::with_manual_epoch(0);
        assert!(!ts.is_wall_set());
    }

    #[test]
    fn manual_epoch_nonzero_sets_wall_clock() {
        let ts = TimeSource::with_manual_epoch(1_700_000_000);
        assert!(ts.is_wall_set());
        assert!(ts.now_wall_s() >= 1_700_000_000);
    }
}
