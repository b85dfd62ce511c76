// Utility helpers for parsing and formatting.
//
// This module centralizes the forgiving CSV/number/date handling so the
// pipeline stages can assume clean, typed values.
use chrono::{NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};
use serde::Serializer;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in CSV exports.
///
/// - Trims whitespace.
/// - Strips a trailing `%` and thousands separators.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    let s = s.strip_suffix('%').unwrap_or(s).trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    s.replace(',', "").parse::<f64>().ok()
}

pub fn parse_i32_safe(s: Option<&str>) -> Option<i32> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<i32>().ok()
}

/// Best-effort date parsing. ISO dates win, then month-first, then
/// day-first. Anything else is `None`.
pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Mean of the present values; `None` when nothing is present.
pub fn mean_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Whole-number percentage as shown on the dashboard, e.g. `83%`.
/// Halves round to even. `None` renders as an empty cell.
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}%", v.round_ties_even() as i64),
        _ => String::new(),
    }
}

pub fn serialize_opt_rate<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_none(),
    }
}

pub fn display_opt_rate(value: &Option<f64>) -> String {
    format_percent(*value)
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Used for counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_percentages() {
        assert_eq!(parse_f64_safe(Some(" 1,234.5 ")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("83%")), Some(83.0));
        assert_eq!(parse_f64_safe(Some("n/a")), None);
        assert_eq!(parse_f64_safe(Some("")), None);
        assert_eq!(parse_f64_safe(None), None);
        assert_eq!(parse_i32_safe(Some("2024")), Some(2024));
    }

    #[test]
    fn parses_common_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(parse_date_safe(Some("2024-03-15")), expected);
        assert_eq!(parse_date_safe(Some("03/15/2024")), expected);
        assert_eq!(parse_date_safe(Some("15/03/2024")), expected);
        assert_eq!(parse_date_safe(Some("15.03.2024")), expected);
        assert_eq!(parse_date_safe(Some("2024-03-15 08:30:00")), expected);
        assert_eq!(parse_date_safe(Some("sometime in March")), None);
    }

    #[test]
    fn mean_skips_missing_values() {
        assert_eq!(mean_present([Some(50.0), None, Some(100.0)]), Some(75.0));
        assert_eq!(mean_present([None, None]), None);
    }

    #[test]
    fn percent_display_rounds_half_to_even() {
        assert_eq!(format_percent(Some(83.4)), "83%");
        assert_eq!(format_percent(Some(62.5)), "62%");
        assert_eq!(format_percent(Some(63.5)), "64%");
        assert_eq!(format_percent(None), "");
    }

    #[test]
    fn numbers_get_thousands_separators() {
        assert_eq!(format_int(9855), "9,855");
    }
}
