use chrono::{DateTime, Duration, NaiveDate, Utc};

/// The "today" and "yesterday" calendar days (UTC) that date-scoped reads fall back across.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub today: NaiveDate,
    pub yesterday: NaiveDate,
}

impl DayWindow {
    pub fn from_now(now_utc: DateTime<Utc>) -> Self {
        let today = now_utc.date_naive();
        Self {
            today,
            yesterday: today - Duration::days(1),
        }
    }

    pub fn is_today(&self, time: DateTime<Utc>) -> bool {
        time.date_naive() == self.today
    }

    pub fn is_yesterday(&self, time: DateTime<Utc>) -> bool {
        time.date_naive() == self.yesterday
    }

    /// Today when any of `times` falls on it, otherwise yesterday.
    pub fn resolve<I>(&self, times: I) -> NaiveDate
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        if times.into_iter().any(|t| self.is_today(t)) {
            self.today
        } else {
            self.yesterday
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn yesterday_crosses_month_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 5, 0).unwrap();
        let w = DayWindow::from_now(now);
        assert_eq!(w.today, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(w.yesterday, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }

    #[test]
    fn classifies_by_utc_calendar_day() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let w = DayWindow::from_now(now);
        assert!(w.is_today(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()));
        assert!(w.is_yesterday(Utc.with_ymd_and_hms(2026, 1, 4, 23, 59, 59).unwrap()));
        assert!(!w.is_today(Utc.with_ymd_and_hms(2026, 1, 4, 23, 59, 59).unwrap()));
        assert!(!w.is_yesterday(Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap()));
    }

    #[test]
    fn resolve_prefers_today_and_falls_back_to_yesterday() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let w = DayWindow::from_now(now);
        let yesterday = Utc.with_ymd_and_hms(2026, 1, 4, 9, 0, 0).unwrap();

        assert_eq!(w.resolve([yesterday, now]), w.today);
        assert_eq!(w.resolve([yesterday]), w.yesterday);
        assert_eq!(w.resolve(std::iter::empty()), w.yesterday);
    }
}
