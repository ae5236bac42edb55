//! User-facing date parsing.
//!
//! Accepted forms, all interpreted in UTC:
//!
//! - RFC 3339 (`2025-12-04T10:30:00Z`)
//! - `YYYY-MM-DD` (noon that day, so the calendar date survives any offset)
//! - `today`, `yesterday`
//! - `<N>d ago` / `<N> days ago`

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::error::{Result, StoreError};

pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>> {
    parse_relative_to(input, Utc::now())
}

fn parse_relative_to(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(at_noon(date));
    }

    match s.to_lowercase().as_str() {
        "today" => return Ok(at_noon(now.date_naive())),
        "yesterday" => return Ok(at_noon(now.date_naive()) - Duration::days(1)),
        _ => {}
    }

    if let Some(days) = parse_days_ago(&s.to_lowercase()) {
        return Ok(at_noon(now.date_naive()) - Duration::days(days));
    }

    Err(invalid(input))
}

fn parse_days_ago(s: &str) -> Option<i64> {
    let rest = s.strip_suffix("ago")?.trim_end();
    let num = rest
        .strip_suffix("days")
        .or_else(|| rest.strip_suffix("day"))
        .or_else(|| rest.strip_suffix('d'))?
        .trim();
    num.parse::<i64>().ok().filter(|n| *n >= 0)
}

fn at_noon(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default())
        .and_utc()
}

fn invalid(input: &str) -> StoreError {
    StoreError::InvalidInput(format!(
        "unrecognized date '{}': use RFC 3339, YYYY-MM-DD, today, yesterday, or Nd ago",
        input
    ))
}
