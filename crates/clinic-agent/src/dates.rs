//! Date-phrase parsing for Korean free-text ranges.
//!
//! Pure text → `DateRange` with no side effects. Recognized patterns, in
//! priority order:
//!
//! - `26년 1월 1일부터 26년 1월 31일` (2- or 4-digit years)
//! - `2026-01-01 ~ 2026-01-31` / `2026-01-01부터 2026-01-31`
//! - `최근 3개월` (last N months, ending today)
//! - `지난 2주` (last N weeks, ending today)
//! - `26년 1월` / `2026년 1월` (that month's first through last day)
//! - `올해` (year-to-date)
//! - `이번 달` (month-to-date)

use chrono::{Datelike, Duration, Local, Months, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

use crate::store::DateRange;

lazy_static! {
    static ref FULL_RANGE: Regex = Regex::new(
        r"(\d{2,4})년\s*(\d{1,2})월\s*(\d{1,2})일\s*부터\s*(\d{2,4})년\s*(\d{1,2})월\s*(\d{1,2})일"
    )
    .unwrap();
    static ref ISO_RANGE: Regex =
        Regex::new(r"(\d{4}-\d{2}-\d{2})\s*(?:~|부터)\s*(\d{4}-\d{2}-\d{2})").unwrap();
    static ref RECENT_MONTHS: Regex = Regex::new(r"최근\s*(\d+)\s*개월").unwrap();
    static ref LAST_WEEKS: Regex = Regex::new(r"지난\s*(\d+)\s*주").unwrap();
    static ref YEAR_MONTH: Regex = Regex::new(r"(\d{2,4})년\s*(\d{1,2})월").unwrap();
    static ref THIS_YEAR: Regex = Regex::new(r"올해").unwrap();
    static ref THIS_MONTH: Regex = Regex::new(r"이번\s*달").unwrap();
}

/// Parse a date phrase relative to the current local date.
pub fn parse_date_phrase(text: &str) -> Option<DateRange> {
    parse_date_phrase_at(text, Local::now().date_naive())
}

/// Parse a date phrase relative to an explicit `today` (testable seam).
pub fn parse_date_phrase_at(text: &str, today: NaiveDate) -> Option<DateRange> {
    if let Some(caps) = FULL_RANGE.captures(text) {
        let start = ymd(&caps[1], &caps[2], &caps[3])?;
        let end = ymd(&caps[4], &caps[5], &caps[6])?;
        return Some(DateRange {
            start_date: start,
            end_date: end,
        });
    }

    if let Some(caps) = ISO_RANGE.captures(text) {
        let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
        return Some(DateRange {
            start_date: start,
            end_date: end,
        });
    }

    if let Some(caps) = RECENT_MONTHS.captures(text) {
        let n: u32 = caps[1].parse().ok()?;
        let start = today.checked_sub_months(Months::new(n))?;
        return Some(DateRange {
            start_date: start,
            end_date: today,
        });
    }

    if let Some(caps) = LAST_WEEKS.captures(text) {
        let n: i64 = caps[1].parse().ok()?;
        let start = today.checked_sub_signed(Duration::weeks(n))?;
        return Some(DateRange {
            start_date: start,
            end_date: today,
        });
    }

    if let Some(caps) = YEAR_MONTH.captures(text) {
        let year = expand_year(caps[1].parse().ok()?);
        let month: u32 = caps[2].parse().ok()?;
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = last_day_of_month(start)?;
        return Some(DateRange {
            start_date: start,
            end_date: end,
        });
    }

    if THIS_YEAR.is_match(text) {
        let start = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
        return Some(DateRange {
            start_date: start,
            end_date: today,
        });
    }

    if THIS_MONTH.is_match(text) {
        let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
        return Some(DateRange {
            start_date: start,
            end_date: today,
        });
    }

    None
}

fn expand_year(year: i32) -> i32 {
    if year < 100 {
        2000 + year
    } else {
        year
    }
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        expand_year(year.parse().ok()?),
        month.parse().ok()?,
        day.parse().ok()?,
    )
}

fn last_day_of_month(first: NaiveDate) -> Option<NaiveDate> {
    let next_month = first.checked_add_months(Months::new(1))?;
    next_month.checked_sub_signed(Duration::days(1))
}
