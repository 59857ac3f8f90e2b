//! Time bucketing for aggregation windows.
//!
//! Two windows are supported:
//!
//! - [`DailyWindow`]: a run of calendar dates in a named timezone, every date
//!   enumerated even when it has no data;
//! - [`MinuteWindow`]: a half-open UTC interval whose keys are
//!   minute-truncated instants, enumerated only when data falls in them.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Assigns timestamps to bucket keys over a bounded window.
pub trait Bucketer {
    /// The bucket key, ordered chronologically.
    type Key: Ord + Copy;

    /// Bucket for a timestamp, or `None` if it falls outside the window.
    fn bucket_of(&self, timestamp: DateTime<Utc>) -> Option<Self::Key>;

    /// Keys that must appear in the output even without data.
    fn seed_keys(&self) -> Vec<Self::Key>;
}

/// Consecutive calendar dates ending at a given local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    tz: Tz,
    start: NaiveDate,
    days: u32,
}

impl DailyWindow {
    /// The `days` dates ending at (and including) `today`.
    #[must_use]
    pub fn ending(today: NaiveDate, days: u32, tz: Tz) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN);
        Self { tz, start, days }
    }

    /// The `days` dates ending at the local date of `now` in `tz`.
    #[must_use]
    pub fn for_now(now: DateTime<Utc>, days: u32, tz: Tz) -> Self {
        Self::ending(now.with_timezone(&tz).date_naive(), days, tz)
    }

    /// Timezone dates are computed in.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First date of the window.
    #[must_use]
    pub fn first(&self) -> NaiveDate {
        self.start
    }

    /// All dates in the window, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take(self.days as usize)
    }

    /// Whether `date` lies in the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && (date - self.start).num_days() < i64::from(self.days)
    }

    /// UTC instant of local midnight at the first date.
    ///
    /// Used as a query lower bound. If midnight does not exist locally (a DST
    /// gap), a day earlier is returned; out-of-window rows are discarded by
    /// [`Bucketer::bucket_of`] anyway.
    #[must_use]
    pub fn start_instant(&self) -> DateTime<Utc> {
        let midnight = self.start.and_time(NaiveTime::MIN);
        self.tz.from_local_datetime(&midnight).earliest().map_or_else(
            || midnight.and_utc() - TimeDelta::days(1),
            |local| local.with_timezone(&Utc),
        )
    }
}

impl Bucketer for DailyWindow {
    type Key = NaiveDate;

    fn bucket_of(&self, timestamp: DateTime<Utc>) -> Option<NaiveDate> {
        let date = timestamp.with_timezone(&self.tz).date_naive();
        self.contains(date).then_some(date)
    }

    fn seed_keys(&self) -> Vec<NaiveDate> {
        self.dates().collect()
    }
}

/// A half-open `[start, end)` UTC interval bucketed by minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl MinuteWindow {
    /// The interval of length `lookback` ending (exclusive) at `end`.
    #[must_use]
    pub fn ending(end: DateTime<Utc>, lookback: TimeDelta) -> Self {
        Self {
            start: end - lookback,
            end,
        }
    }

    /// Inclusive lower bound.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive upper bound.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `timestamp` lies in `[start, end)`.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Drop seconds and sub-second precision.
#[must_use]
pub fn truncate_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

impl Bucketer for MinuteWindow {
    type Key = DateTime<Utc>;

    fn bucket_of(&self, timestamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.contains(timestamp)
            .then(|| truncate_to_minute(timestamp))
    }

    fn seed_keys(&self) -> Vec<DateTime<Utc>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_window_has_seven_ordered_dates() {
        let window = DailyWindow::ending(date(2026, 3, 2), 7, Tz::UTC);
        let dates: Vec<_> = window.dates().collect();

        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], date(2026, 2, 24));
        assert_eq!(dates[6], date(2026, 3, 2));
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(window.seed_keys(), dates);
    }

    #[test]
    fn test_daily_window_for_now_uses_timezone() {
        // 23:30 UTC on the 1st is already the 2nd in Cairo
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();

        let utc = DailyWindow::for_now(now, 7, Tz::UTC);
        let cairo = DailyWindow::for_now(now, 7, Tz::Africa__Cairo);

        assert_eq!(utc.dates().last(), Some(date(2026, 3, 1)));
        assert_eq!(cairo.dates().last(), Some(date(2026, 3, 2)));
    }

    #[test]
    fn test_daily_bucket_converts_timezone() {
        let window = DailyWindow::ending(date(2026, 3, 2), 7, Tz::Africa__Cairo);
        let late_utc = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(window.bucket_of(late_utc), Some(date(2026, 3, 2)));
    }

    #[test]
    fn test_daily_bucket_discards_outside_window() {
        let window = DailyWindow::ending(date(2026, 3, 2), 7, Tz::UTC);
        let too_old = Utc.with_ymd_and_hms(2026, 2, 23, 23, 59, 59).unwrap();
        let first = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap();

        assert_eq!(window.bucket_of(too_old), None);
        assert_eq!(window.bucket_of(first), Some(date(2026, 2, 24)));
        assert_eq!(window.bucket_of(future), None);
    }

    #[test]
    fn test_daily_start_instant() {
        let utc = DailyWindow::ending(date(2026, 3, 7), 7, Tz::UTC);
        assert_eq!(
            utc.start_instant(),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );

        // Cairo is UTC+2 in March
        let cairo = DailyWindow::ending(date(2026, 3, 7), 7, Tz::Africa__Cairo);
        assert_eq!(
            cairo.start_instant(),
            Utc.with_ymd_and_hms(2026, 2, 28, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_window_zero_days_is_empty() {
        let window = DailyWindow::ending(date(2026, 3, 2), 0, Tz::UTC);
        assert_eq!(window.dates().count(), 0);
        assert!(!window.contains(date(2026, 3, 2)));
    }

    #[test]
    fn test_minute_window_is_half_open() {
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let window = MinuteWindow::ending(end, TimeDelta::hours(24));

        assert_eq!(window.start(), end - TimeDelta::hours(24));
        assert!(window.contains(window.start()));
        assert!(!window.contains(end));
        assert!(window.contains(end - TimeDelta::seconds(1)));
        assert!(!window.contains(window.start() - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_minute_bucket_truncates() {
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let window = MinuteWindow::ending(end, TimeDelta::hours(24));
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 11, 42, 59).unwrap()
            + TimeDelta::milliseconds(750);

        assert_eq!(
            window.bucket_of(ts),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 11, 42, 0).unwrap())
        );
        assert_eq!(window.bucket_of(end), None);
        assert!(window.seed_keys().is_empty());
    }
}
