//! Date canonicalization to ISO `YYYY-MM-DD`.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

#[derive(Debug, Clone, Copy)]
enum FieldOrder {
    YearFirst,
    DayFirst,
}

static DATE_LAYOUTS: Lazy<Vec<(Regex, FieldOrder)>> = Lazy::new(|| {
    [
        (r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ].*)?$", FieldOrder::YearFirst),
        (r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$", FieldOrder::DayFirst),
        (r"^(\d{1,2})/(\d{1,2})/(\d{4})$", FieldOrder::DayFirst),
        (r"^(\d{4})/(\d{1,2})/(\d{1,2})$", FieldOrder::YearFirst),
        (r"^(\d{4})(\d{2})(\d{2})$", FieldOrder::YearFirst),
    ]
    .into_iter()
    .map(|(pattern, order)| (Regex::new(pattern).expect("valid date layout regex"), order))
    .collect()
});

/// Parses one of the accepted layouts into a calendar date.
///
/// Returns `None` for unknown layouts, impossible dates and years outside
/// `1900..=2100`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    DATE_LAYOUTS.iter().find_map(|(pattern, order)| {
        let caps = pattern.captures(trimmed)?;
        let first = caps.get(1)?.as_str();
        let second = caps.get(2)?.as_str();
        let third = caps.get(3)?.as_str();
        let (year, month, day) = match order {
            FieldOrder::YearFirst => (first, second, third),
            FieldOrder::DayFirst => (third, second, first),
        };
        let year = year.parse::<i32>().ok()?;
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
    })
}

/// Returns the ISO form, or `None` when the input is not a recognizable date.
pub fn canonicalize_date(value: &str) -> Option<String> {
    parse_date(value).map(|date| date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::canonicalize_date;

    #[test]
    fn accepts_all_supported_layouts() {
        for input in ["25.12.2023", "25/12/2023", "20231225", "2023-12-25", "2023/12/25"] {
            assert_eq!(
                canonicalize_date(input).as_deref(),
                Some("2023-12-25"),
                "layout {input}"
            );
        }
    }

    #[test]
    fn pads_single_digit_day_and_month() {
        assert_eq!(canonicalize_date("1.2.1980").as_deref(), Some("1980-02-01"));
    }

    #[test]
    fn accepts_iso_timestamps() {
        assert_eq!(
            canonicalize_date("2023-12-25T08:30:00Z").as_deref(),
            Some("2023-12-25")
        );
    }

    #[test]
    fn rejects_impossible_or_out_of_range_dates() {
        assert_eq!(canonicalize_date("31.02.2020"), None);
        assert_eq!(canonicalize_date("01.01.1850"), None);
        assert_eq!(canonicalize_date("13/13/2020"), None);
        assert_eq!(canonicalize_date("unknown"), None);
    }
}
