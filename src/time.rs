//! Time window type used by proposals and claims.
//!
//! A window is a half-open interval `[start, end)`. Unlike open-ended
//! validity ranges, every claim on a physical resource has a bounded
//! duration; an unbounded claim would starve every other producer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A bounded half-open time interval `[start, end)`.
///
/// # Examples
///
/// ```
/// use warden::TimeWindow;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let window = TimeWindow::new(now, now + Duration::minutes(15)).unwrap();
/// assert!(window.contains(now));
/// assert_eq!(window.duration(), Duration::minutes(15));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,

    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window from two timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTimeWindow` if `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidTimeWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a window starting at `start` with the given duration.
    ///
    /// # Panics
    ///
    /// Panics if `duration` is zero or negative.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        assert!(duration > Duration::zero(), "duration must be positive");
        Self {
            start,
            end: start + duration,
        }
    }

    /// Returns the window's duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if a timestamp falls within `[start, end)`.
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }

    /// Returns true if the two windows share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the intersection of two windows, if any.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Returns the smallest window covering both inputs.
    #[must_use]
    pub fn envelope(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Returns a window of the same length starting at `start`.
    #[must_use]
    pub fn shifted_to(&self, start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + self.duration(),
        }
    }

    /// Whole minutes between this window's start and `other`'s start.
    ///
    /// Positive when `other` starts later. Used to express reschedule delay.
    #[must_use]
    pub fn delay_until(&self, other: &Self) -> i64 {
        (other.start - self.start).num_minutes()
    }

    /// Returns true if the window has fully elapsed at `now`.
    #[must_use]
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::minutes(minute)
    }

    fn window(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(at(start), at(end)).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted() {
        let err = TimeWindow::new(at(10), at(5)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimeWindow { .. }));
    }

    #[test]
    fn test_new_rejects_empty() {
        assert!(TimeWindow::new(at(10), at(10)).is_err());
    }

    #[test]
    fn test_contains_half_open() {
        let w = window(0, 10);
        assert!(w.contains(at(0)));
        assert!(w.contains(at(9)));
        assert!(!w.contains(at(10)));
    }

    #[test]
    fn test_overlap_partial() {
        // 9:20-9:30 vs 9:25-9:35 style partial overlap.
        assert!(window(20, 30).overlaps(&window(25, 35)));
        assert!(window(25, 35).overlaps(&window(20, 30)));
    }

    #[test]
    fn test_adjacent_windows_do_not_overlap() {
        assert!(!window(0, 10).overlaps(&window(10, 20)));
    }

    #[test]
    fn test_intersection() {
        let i = window(20, 40).intersection(&window(30, 50)).unwrap();
        assert_eq!(i, window(30, 40));
        assert!(window(0, 10).intersection(&window(10, 20)).is_none());
    }

    #[test]
    fn test_envelope() {
        assert_eq!(window(20, 40).envelope(&window(30, 50)), window(20, 50));
    }

    #[test]
    fn test_shifted_preserves_duration() {
        let w = window(0, 15);
        let shifted = w.shifted_to(at(40));
        assert_eq!(shifted, window(40, 55));
        assert_eq!(shifted.duration(), w.duration());
    }

    #[test]
    fn test_delay_until() {
        let w = window(0, 15);
        assert_eq!(w.delay_until(&w.shifted_to(at(25))), 25);
        assert_eq!(w.shifted_to(at(25)).delay_until(&w), -25);
    }

    #[test]
    fn test_has_elapsed() {
        assert!(window(0, 10).has_elapsed(at(10)));
        assert!(!window(0, 10).has_elapsed(at(9)));
    }

    #[test]
    fn test_serde_round_trip() {
        let w = window(5, 25);
        let json = serde_json::to_string(&w).unwrap();
        let back: TimeWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }
}
