use std::cell::Cell;
use std::rc::Rc;

/// Page-level loading indicator.
pub trait LoadingSink {
    fn set_loading(&mut self, percent: u8);
}

impl LoadingSink for Rc<Cell<u8>> {
    fn set_loading(&mut self, percent: u8) {
        self.set(percent);
    }
}

/// Highest value an in-flight attempt may report. 100 is reserved for the
/// terminal transition so the page only unblocks once the outcome is known.
pub const IN_FLIGHT_CEILING: u8 = 99;

/// Integer percentage from a byte count. `None` when the total is unknown.
pub fn percent_of(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = (loaded.min(total) as u128 * 100 / total as u128) as u8;
    Some(percent)
}

/// Monotonic progress for one load attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    percent: u8,
    complete: bool,
}

impl ProgressTracker {
    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn reset(&mut self) {
        self.percent = 0;
        self.complete = false;
    }

    /// Returns the new value only if it strictly exceeds the last one.
    /// Nothing propagates once the attempt has completed.
    pub fn advance(&mut self, percent: u8) -> Option<u8> {
        if self.complete {
            return None;
        }
        let percent = percent.min(IN_FLIGHT_CEILING);
        if percent <= self.percent {
            return None;
        }
        self.percent = percent;
        Some(percent)
    }

    /// Forces 100. Returns `None` if already complete.
    pub fn complete(&mut self) -> Option<u8> {
        if self.complete {
            return None;
        }
        self.complete = true;
        self.percent = 100;
        Some(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_and_decreasing_values_are_suppressed() {
        let mut tracker = ProgressTracker::default();
        let emitted: Vec<u8> = [5u8, 5, 3, 12, 40, 39, 40, 41]
            .into_iter()
            .filter_map(|value| tracker.advance(value))
            .collect();
        assert_eq!(emitted, vec![5, 12, 40, 41]);
    }

    #[test]
    fn in_flight_progress_never_reports_done() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.advance(100), Some(IN_FLIGHT_CEILING));
        assert_eq!(tracker.advance(100), None);
        assert_eq!(tracker.complete(), Some(100));
        assert_eq!(tracker.complete(), None);
        assert_eq!(tracker.advance(100), None);
    }

    #[test]
    fn reset_starts_again_from_zero() {
        let mut tracker = ProgressTracker::default();
        tracker.advance(70);
        tracker.complete();
        tracker.reset();
        assert_eq!(tracker.percent(), 0);
        assert!(!tracker.is_complete());
        assert_eq!(tracker.advance(1), Some(1));
    }

    #[test]
    fn byte_counts_round_down() {
        assert_eq!(percent_of(0, 0), None);
        assert_eq!(percent_of(1, 3), Some(33));
        assert_eq!(percent_of(10, 3), Some(100));
        assert_eq!(percent_of(u64::MAX, u64::MAX), Some(100));
    }
}
