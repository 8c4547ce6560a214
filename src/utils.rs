use chrono::{Datelike, Days, Months, NaiveDate};

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Start of a window of `days` days ending on `today`. Windows shorter than a
/// day are widened to one day.
pub fn window_start_days(today: NaiveDate, days: i64) -> NaiveDate {
    let days = days.max(1) as u64;
    today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

/// First day of the month `months - 1` months before `today`, so a window of
/// `months` covers the current month plus the preceding `months - 1`.
pub fn window_start_months(today: NaiveDate, months: i64) -> NaiveDate {
    let back = (months.max(1) - 1) as u32;
    first_day_of_month(today)
        .checked_sub_months(Months::new(back))
        .unwrap_or(NaiveDate::MIN)
}

pub fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = ((date.month() - 1) / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

pub fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_window_start_days() {
        assert_eq!(window_start_days(d(2024, 3, 31), 30), d(2024, 3, 1));
        assert_eq!(window_start_days(d(2024, 3, 31), 0), d(2024, 3, 30));
    }

    #[test]
    fn test_window_start_months() {
        assert_eq!(window_start_months(d(2024, 3, 15), 6), d(2023, 10, 1));
        assert_eq!(window_start_months(d(2024, 3, 15), 1), d(2024, 3, 1));
    }

    #[test]
    fn test_quarter_start() {
        assert_eq!(quarter_start(d(2024, 5, 20)), d(2024, 4, 1));
        assert_eq!(quarter_start(d(2024, 12, 31)), d(2024, 10, 1));
        assert_eq!(quarter_start(d(2024, 1, 1)), d(2024, 1, 1));
    }
}
