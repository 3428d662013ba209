//! Throttling for progress and speed reporting.

use std::time::{Duration, Instant};

/// Bytes that must accumulate after the last progress report before the next.
pub const PROGRESS_THRESHOLD: u64 = 100 * 1024;
/// Minimum time between two speed reports.
pub const SPEED_INTERVAL: Duration = Duration::from_secs(1);

/// Decides when a cumulative byte count is worth reporting.
///
/// Reports are monotonic: a count that falls back (as it does when an item is
/// retried) stays silent until it passes the highest count already reported.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    reported: u64,
}
impl ProgressMeter {
    /// Returns `true` if `written` is more than [`PROGRESS_THRESHOLD`] past the
    /// last reported count.
    pub fn update(&mut self, written: u64) -> bool {
        if written > self.reported && written - self.reported > PROGRESS_THRESHOLD {
            self.reported = written;
            return true;
        }
        false
    }

    /// Returns `true` if anything beyond the last report is still unreported.
    pub fn flush(&mut self, written: u64) -> bool {
        if written > self.reported {
            self.reported = written;
            return true;
        }
        false
    }

    pub fn reported(&self) -> u64 {
        self.reported
    }
}

/// Accumulates bytes and releases them at most once per [`SPEED_INTERVAL`].
#[derive(Debug)]
pub struct SpeedMeter {
    since: Instant,
    bytes: u64,
}
impl SpeedMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(since: Instant) -> Self {
        Self { since, bytes: 0 }
    }

    pub fn record(&mut self, bytes: u64) -> Option<u64> {
        self.record_at(bytes, Instant::now())
    }

    /// Add `bytes`; once more than [`SPEED_INTERVAL`] has passed since the
    /// previous release, return everything accumulated and start over.
    pub fn record_at(&mut self, bytes: u64, now: Instant) -> Option<u64> {
        self.bytes += bytes;
        if now.saturating_duration_since(self.since) <= SPEED_INTERVAL {
            return None;
        }
        self.since = now;
        Some(std::mem::take(&mut self.bytes))
    }
}
impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_threshold() {
        let mut meter = ProgressMeter::default();
        assert!(!meter.update(PROGRESS_THRESHOLD));
        assert!(meter.update(PROGRESS_THRESHOLD + 1));
        assert!(!meter.update(PROGRESS_THRESHOLD + 2));
        assert!(meter.update(2 * PROGRESS_THRESHOLD + 2));
        assert_eq!(meter.reported(), 2 * PROGRESS_THRESHOLD + 2);
    }

    #[test]
    fn test_progress_never_goes_back() {
        let mut meter = ProgressMeter::default();
        assert!(meter.update(500_000));
        // A retried item starts again from a lower count.
        assert!(!meter.update(10));
        assert!(!meter.update(500_000 + PROGRESS_THRESHOLD));
        assert!(!meter.flush(400_000));
        assert!(meter.flush(500_001));
        assert!(!meter.flush(500_001));
    }

    #[test]
    fn test_speed_interval() {
        let start = Instant::now();
        let mut meter = SpeedMeter::starting_at(start);
        assert_eq!(meter.record_at(10, start + Duration::from_millis(300)), None);
        assert_eq!(meter.record_at(10, start + SPEED_INTERVAL), None);
        assert_eq!(meter.record_at(10, start + Duration::from_millis(1001)), Some(30));
        assert_eq!(meter.record_at(5, start + Duration::from_millis(1500)), None);
        assert_eq!(meter.record_at(5, start + Duration::from_millis(2002)), Some(10));
    }
}
