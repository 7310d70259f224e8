//! Publish-date parsing. Unparseable input never fails; it falls back to the
//! current time.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;

static HOURS_AGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*hours?\s*ago$").expect("valid regex"));
static DAYS_AGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*days?\s*ago$").expect("valid regex"));
static MONTH_DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z]+)\s+(\d{1,2})$").expect("valid regex"));
static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(st|nd|rd|th)").expect("valid regex"));
static DATE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+\s\d+,\s\d+").expect("valid regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%B %d, %Y %H:%M",
    "%B %d, %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
];

/// Parse a human-written date relative to `now`.
///
/// Understands `N hours ago`, `N days ago`, `Month D` (current year) and a
/// set of absolute formats. Anything else yields `now`.
pub fn parse_date_at(input: &str, now: DateTime<Local>) -> DateTime<Local> {
    let lower = input.trim().to_lowercase();

    if let Some(caps) = HOURS_AGO_RE.captures(&lower) {
        if let Ok(hours) = caps[1].parse::<i64>() {
            tracing::debug!("Matched hours ago");
            return Duration::try_hours(hours)
                .and_then(|d| now.checked_sub_signed(d))
                .unwrap_or(now);
        }
    }

    if let Some(caps) = DAYS_AGO_RE.captures(&lower) {
        if let Ok(days) = caps[1].parse::<i64>() {
            tracing::debug!("Matched days ago");
            return Duration::try_days(days)
                .and_then(|d| now.checked_sub_signed(d))
                .unwrap_or(now);
        }
    }

    if let Some(caps) = MONTH_DAY_RE.captures(&lower) {
        tracing::debug!("Matched month + day");
        let candidate = format!("{} {} {}", &caps[1], &caps[2], now.year());
        if let Some(date) = parse_absolute(&candidate) {
            return date;
        }
    }

    parse_absolute(input.trim()).unwrap_or(now)
}

/// [`parse_date_at`] against the current local time.
pub fn parse_date(input: &str) -> DateTime<Local> {
    parse_date_at(input, Local::now())
}

/// Parse the head of a Fanbox date line such as
/// `March 5th, 2024 17:00・Free`.
pub fn parse_ordinal_date(input: &str) -> DateTime<Local> {
    let head = input.split('・').next().unwrap_or_default();
    let cleaned = ORDINAL_RE.replace(head, "$1");
    parse_date(&cleaned)
}

/// Pick the first line of a multi-line header that looks like `Mar 5, 2024`
/// and parse it.
pub fn parse_date_line(text: &str) -> DateTime<Local> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && DATE_LINE_RE.is_match(line))
        .and_then(parse_absolute)
        .unwrap_or_else(Local::now)
}

fn parse_absolute(input: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Local));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.with_timezone(&Local));
    }
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local.from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 3, 10, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    fn ymd(d: DateTime<Local>) -> (i32, u32, u32) {
        (d.year(), d.month(), d.day())
    }

    #[test]
    fn relative_hours_and_days() {
        assert_eq!(parse_date_at("17 hours ago", now()), now() - Duration::hours(17));
        assert_eq!(parse_date_at("1 hour ago", now()), now() - Duration::hours(1));
        assert_eq!(ymd(parse_date_at("5 days ago", now())), (2025, 3, 5));
    }

    #[test]
    fn month_day_assumes_current_year() {
        assert_eq!(ymd(parse_date_at("February 26", now())), (2025, 2, 26));
        assert_eq!(ymd(parse_date_at("Feb 3", now())), (2025, 2, 3));
    }

    #[test]
    fn absolute_dates() {
        assert_eq!(ymd(parse_date_at("Apr 27, 2018", now())), (2018, 4, 27));
        assert_eq!(ymd(parse_date_at("April 27, 2018", now())), (2018, 4, 27));
        assert_eq!(ymd(parse_date_at("2021-11-02", now())), (2021, 11, 2));
    }

    #[test]
    fn garbage_falls_back_to_now() {
        assert_eq!(parse_date_at("", now()), now());
        assert_eq!(parse_date_at("not a date at all", now()), now());
        let huge = "9".repeat(4096);
        assert_eq!(parse_date_at(&format!("{huge} hours ago"), now()), now());
        assert_eq!(parse_date_at(&format!("{huge} days ago"), now()), now());
    }

    #[test]
    fn fanbox_ordinals() {
        assert_eq!(ymd(parse_ordinal_date("March 5th, 2024 17:00・Free")), (2024, 3, 5));
        assert_eq!(ymd(parse_ordinal_date("January 22nd, 2023")), (2023, 1, 22));
    }

    #[test]
    fn substack_header_line() {
        let header = "Author Name\nMar 5, 2024\n12 min read";
        assert_eq!(ymd(parse_date_line(header)), (2024, 3, 5));
    }
}
