//! Monotonic timestamp source
//!
//! Wall-clock time is read once, when the clock is created. Every later
//! reading adds the elapsed `Instant` time to that anchor, so timestamps never
//! go backwards even if the system clock is adjusted.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use std::time::Instant;

/// Format of every timestamp the monitor hands out
pub const MONITOR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Wall-clock anchor plus monotonic offset
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_wall: DateTime<Local>,
    start_instant: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Anchor a new clock at the current wall-clock time
    pub fn new() -> Self {
        Self::anchored_at(Local::now())
    }

    /// Anchor a new clock at a specific wall-clock time
    pub fn anchored_at(start_wall: DateTime<Local>) -> Self {
        Self {
            start_wall,
            start_instant: Instant::now(),
        }
    }

    /// Current time: anchor + monotonic elapsed time
    pub fn now(&self) -> DateTime<Local> {
        let elapsed = ChronoDuration::from_std(self.start_instant.elapsed())
            .unwrap_or_else(|_| ChronoDuration::zero());
        self.start_wall + elapsed
    }

    /// Current time formatted with [`MONITOR_TIME_FORMAT`]
    pub fn now_formatted(&self) -> String {
        self.now().format(MONITOR_TIME_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    #[test]
    fn test_anchor_is_respected() {
        let anchor = Local.with_ymd_and_hms(2015, 8, 21, 19, 15, 43).unwrap();
        let clock = MonotonicClock::anchored_at(anchor);

        let now = clock.now();
        assert!(now >= anchor);
        assert!(now - anchor < ChronoDuration::seconds(5));
    }

    #[test]
    fn test_formatted_shape() {
        let formatted = MonotonicClock::new().now_formatted();

        // e.g. "2015-08-21 19:15:43.809"
        assert_eq!(formatted.len(), 23);
        assert!(NaiveDateTime::parse_from_str(&formatted, MONITOR_TIME_FORMAT).is_ok());
    }

    #[test]
    fn test_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let current = clock.now();
            assert!(current >= previous);
            previous = current;
        }
    }
}
