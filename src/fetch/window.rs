//! Shrinking date-window state machine for windowed fetchers.
//!
//! An open-ended "give me N items" request is converted into a sequence
//! of bounded queries over `[after, before]` date ranges. Windows shift
//! strictly backward in time and are never re-issued; the width of each
//! window is derived from a running estimate of how many artifacts the
//! source yields per day, so query cost stays roughly proportional to
//! the number of items requested rather than to the full date range.

use chrono::{DateTime, Duration, Utc};

use crate::error::ScrapeError;

/// Initial artifacts-per-day guess before any window has been observed.
pub const INITIAL_RATE_PER_DAY: f64 = 25.0;

/// Smoothing factor for the exponential moving average of the rate.
pub const RATE_SMOOTHING: f64 = 0.3;

/// Lower clamp on the estimated rate, so a run of empty windows widens
/// the window instead of dividing by zero.
pub const MIN_RATE_PER_DAY: f64 = 0.1;

/// Upper clamp on a single window's width in days.
pub const MAX_WINDOW_DAYS: i64 = 30;

/// Exponentially-updated estimate of artifacts per day.
///
/// The exact smoothing behavior is a tunable, not a contract; the only
/// guaranteed property is that window widths shrink as the estimated
/// rate grows.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    rate_per_day: f64,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self {
            rate_per_day: INITIAL_RATE_PER_DAY,
        }
    }
}

impl RateEstimator {
    /// Record that a window spanning `days` yielded `results` artifacts.
    pub fn observe(&mut self, results: usize, days: i64) {
        let observed = results as f64 / days.max(1) as f64;
        self.rate_per_day =
            (RATE_SMOOTHING * observed + (1.0 - RATE_SMOOTHING) * self.rate_per_day)
                .max(MIN_RATE_PER_DAY);
    }

    /// Width in days of a window expected to yield `needed` artifacts.
    pub fn window_days(&self, needed: usize) -> i64 {
        let days = (needed as f64 / self.rate_per_day).ceil() as i64;
        days.clamp(1, MAX_WINDOW_DAYS)
    }

    /// Current artifacts-per-day estimate.
    pub fn rate_per_day(&self) -> f64 {
        self.rate_per_day
    }
}

/// A `[lower, upper]` date span that shifts monotonically backward from
/// the configured `before` boundary toward the configured `after` floor.
#[derive(Debug, Clone)]
pub struct DateWindow {
    floor: DateTime<Utc>,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
    rate: RateEstimator,
}

impl DateWindow {
    /// Create a window anchored at `before`, with `after` as the
    /// exhaustion floor. No span is available until [`advance`] is
    /// called.
    ///
    /// [`advance`]: DateWindow::advance
    pub fn new(after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            floor: after,
            lower: before,
            upper: before,
            rate: RateEstimator::default(),
        }
    }

    /// Shift the window strictly backward and return the new
    /// `(lower, upper)` span to query.
    ///
    /// The width is sized so the span is expected to yield `needed`
    /// artifacts. Returns [`ScrapeError::Exhausted`] once the lower
    /// bound would cross the configured floor.
    pub fn advance(&mut self, needed: usize) -> Result<(DateTime<Utc>, DateTime<Utc>), ScrapeError> {
        let days = self.rate.window_days(needed.max(1));
        self.upper = self.lower;
        self.lower = self.upper - Duration::days(days);
        if self.lower < self.floor {
            return Err(ScrapeError::Exhausted {
                floor: self.floor.format("%Y-%m-%d").to_string(),
            });
        }
        Ok((self.lower, self.upper))
    }

    /// Record how many artifacts the current span yielded, updating the
    /// rate estimate used to size the next window.
    pub fn observe(&mut self, results: usize) {
        let days = (self.upper - self.lower).num_days();
        self.rate.observe(results, days);
    }

    /// The current `(lower, upper)` span.
    pub fn span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.lower, self.upper)
    }

    /// Current artifacts-per-day estimate.
    pub fn rate_per_day(&self) -> f64 {
        self.rate.rate_per_day()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn windows_shift_strictly_backward() {
        let mut window = DateWindow::new(date(2020, 1, 1), date(2024, 1, 1));
        let (lower1, upper1) = window.advance(50).unwrap();
        assert_eq!(upper1, date(2024, 1, 1));
        assert!(lower1 < upper1);

        let (lower2, upper2) = window.advance(50).unwrap();
        // Non-overlapping, monotonically decreasing.
        assert_eq!(upper2, lower1);
        assert!(lower2 < upper2);
    }

    #[test]
    fn crossing_the_floor_is_exhaustion() {
        let mut window = DateWindow::new(date(2023, 12, 30), date(2024, 1, 1));
        // First window of >= 2 days fits; the next one must cross the floor.
        let mut exhausted = false;
        for _ in 0..10 {
            if let Err(err) = window.advance(25) {
                assert!(matches!(err, ScrapeError::Exhausted { .. }));
                assert!(!err.is_retryable());
                exhausted = true;
                break;
            }
        }
        assert!(exhausted);
    }

    #[test]
    fn zero_results_are_not_exhaustion() {
        let mut window = DateWindow::new(date(2020, 1, 1), date(2024, 1, 1));
        window.advance(10).unwrap();
        window.observe(0);
        // Still advances; an empty window only widens the next one.
        assert!(window.advance(10).is_ok());
    }

    #[test]
    fn width_shrinks_as_rate_grows() {
        let mut sparse = RateEstimator::default();
        let mut dense = RateEstimator::default();
        for _ in 0..10 {
            sparse.observe(1, 1);
            dense.observe(500, 1);
        }
        assert!(dense.rate_per_day() > sparse.rate_per_day());
        assert!(dense.window_days(100) < sparse.window_days(100));
    }

    #[test]
    fn width_is_clamped() {
        let mut estimator = RateEstimator::default();
        for _ in 0..50 {
            estimator.observe(0, 1);
        }
        assert_eq!(estimator.window_days(1_000_000), MAX_WINDOW_DAYS);

        for _ in 0..50 {
            estimator.observe(100_000, 1);
        }
        assert_eq!(estimator.window_days(1), 1);
    }

    #[test]
    fn empty_windows_widen_subsequent_ones() {
        let mut window = DateWindow::new(date(2000, 1, 1), date(2024, 1, 1));
        let (lower1, upper1) = window.advance(50).unwrap();
        let width1 = (upper1 - lower1).num_days();
        for _ in 0..5 {
            window.observe(0);
            window.advance(50).unwrap();
        }
        let (lower, upper) = window.span();
        assert!((upper - lower).num_days() >= width1);
    }
}
