//! Indonesian day and month names, and `YYYY-MM` reporting periods.

use chrono::{Datelike, Months, NaiveDate};

const DAYS: [&str; 7] = ["Senin", "Selasa", "Rabu", "Kamis", "Jumat", "Sabtu", "Minggu"];

const MONTHS: [&str; 12] = [
    "Januari", "Februari", "Maret", "April", "Mei", "Juni", "Juli", "Agustus", "September",
    "Oktober", "November", "Desember",
];

pub fn day_name(date: NaiveDate) -> &'static str {
    DAYS[date.weekday().num_days_from_monday() as usize]
}

pub fn month_name(date: NaiveDate) -> &'static str {
    MONTHS[date.month0() as usize]
}

/// First and last day of a `YYYY-MM` period.
pub fn period_bounds(period: &str) -> Option<(NaiveDate, NaiveDate)> {
    let bytes = period.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return None;
    }
    let start = NaiveDate::parse_from_str(&format!("{period}-01"), "%Y-%m-%d").ok()?;
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn names() {
        // 2025-01-06 was a Monday
        assert_eq!(day_name(date(2025, 1, 6)), "Senin");
        assert_eq!(day_name(date(2025, 1, 12)), "Minggu");
        assert_eq!(month_name(date(2025, 1, 6)), "Januari");
        assert_eq!(month_name(date(2025, 12, 1)), "Desember");
    }

    #[test]
    fn periods() {
        assert_eq!(
            period_bounds("2024-02"),
            Some((date(2024, 2, 1), date(2024, 2, 29)))
        );
        assert_eq!(
            period_bounds("2025-12"),
            Some((date(2025, 12, 1), date(2025, 12, 31)))
        );
        assert_eq!(period_bounds("2025-13"), None);
        assert_eq!(period_bounds("2025-1"), None);
        assert_eq!(period_bounds("202501"), None);
    }
}
