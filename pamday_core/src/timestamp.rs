//! Timestamp conventions shared by metadata and audio file names.
//!
//! Metadata files carry the day as an 8-digit `YYYYMMDD` token in their file
//! stem. Audio files carry the recording start as `YYYYMMDD`, an optional
//! separator (`T`, `_` or `-`), then `HHMMSS`, for example
//! `MARS-20220902T095800Z-16kHz.wav`. Tokens must not touch other digits.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;

/// Format used for segment identifiers and output file names.
pub const IDENTIFIER_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])([0-9]{4})([0-9]{2})([0-9]{2})(?:[^0-9]|$)")
            .expect("date pattern is valid")
    })
}

fn datetime_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?:^|[^0-9])([0-9]{4})([0-9]{2})([0-9]{2})[T_-]?([0-9]{2})([0-9]{2})([0-9]{2})(?:[^0-9]|$)",
        )
        .expect("datetime pattern is valid")
    })
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

/// Return every calendar date encoded in the file stem of `path`.
///
/// Only standalone 8-digit tokens count, so `20220902T100000Z` yields the
/// date while `120220902` yields nothing.
pub fn dates_in_name(path: &Path) -> Vec<NaiveDate> {
    let Some(stem) = file_stem(path) else {
        return Vec::new();
    };

    let mut dates = Vec::new();
    let mut offset = 0;
    // Tokens may share a separator, so resume right after each date.
    while let Some(caps) = date_pattern().captures(&stem[offset..]) {
        let (Some(year), Some(month), Some(day)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            break;
        };
        if let (Ok(y), Ok(m), Ok(d)) = (
            year.as_str().parse::<i32>(),
            month.as_str().parse::<u32>(),
            day.as_str().parse::<u32>(),
        ) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                dates.push(date);
            }
        }
        offset += day.end();
    }
    dates
}

/// Whether the file stem of `path` names `date`.
pub fn name_matches_date(path: &Path, date: NaiveDate) -> bool {
    dates_in_name(path).contains(&date)
}

/// Parse the recording start timestamp encoded in the file stem of `path`.
///
/// Timestamps are interpreted as UTC. The first valid timestamp wins.
pub fn recording_start(path: &Path) -> Option<DateTime<Utc>> {
    let stem = file_stem(path)?;
    datetime_pattern().captures_iter(stem).find_map(|caps| {
        let field = |index: usize| caps.get(index).and_then(|m| m.as_str().parse::<u32>().ok());
        let date = NaiveDate::from_ymd_opt(
            caps.get(1)?.as_str().parse::<i32>().ok()?,
            field(2)?,
            field(3)?,
        )?;
        let time = NaiveTime::from_hms_opt(field(4)?, field(5)?, field(6)?)?;
        Some(NaiveDateTime::new(date, time).and_utc())
    })
}

/// Render the identifier used to name a segment's outputs.
pub fn identifier(instant: DateTime<Utc>) -> String {
    instant.format(IDENTIFIER_FORMAT).to_string()
}
