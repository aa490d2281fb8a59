//! Shared parsing utilities for parcel data sources.
//!
//! Construction years arrive in every shape a provider can think of:
//! plain integers, epoch timestamps, ISO dates, US and European slashed
//! dates, dotted dates, or something bespoke. [`parse_year`] folds them all
//! into an optional plausible year.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike as _, NaiveDate, NaiveDateTime};
use parcel_map_parcel_models::is_plausible_year;
use regex::Regex;
use serde::Deserialize;

/// Numbers with a larger magnitude are Unix timestamps in seconds.
const EPOCH_SECONDS_THRESHOLD: f64 = 1e9;

/// Numbers with a larger magnitude are Unix timestamps in milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ].*)?$").expect("valid ISO date regex")
});

static SLASHED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})(?:[T ].*)?$").expect("valid slashed date regex")
});

static DOTTED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})(?:[T ].*)?$").expect("valid dotted date regex")
});

static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})$").expect("valid bare year regex"));

/// The date dialect a source declares for its date fields.
///
/// Auto-detection always runs first; the declared format decides the
/// day/month order of ambiguous slashed dates and is the last resort for
/// text no built-in dialect recognizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// `YYYY-MM-DD`, optionally followed by a time.
    #[default]
    Iso,
    /// `MM/DD/YYYY`.
    Us,
    /// `DD/MM/YYYY` or `DD.MM.YYYY`.
    Eu,
    /// A bare four-digit year.
    Year,
    /// A `chrono` format string such as `"%d-%b-%Y"`.
    Custom(String),
}

/// A date value was present but matched no known dialect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable date value: {0}")]
pub struct DateParseError(pub String);

/// Extracts a construction year from a raw JSON value.
///
/// Returns `Ok(None)` for null, empty, or implausible values (outside
/// 1400–2100, which also covers the common `0` placeholder).
///
/// # Errors
///
/// Returns [`DateParseError`] if the value is non-empty text that no
/// dialect can parse, or a JSON type that cannot hold a date.
pub fn parse_year(
    value: &serde_json::Value,
    default_format: &DateFormat,
) -> Result<Option<i32>, DateParseError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_f64().and_then(year_from_number)),
        serde_json::Value::String(s) => parse_year_str(s, default_format),
        other => Err(DateParseError(other.to_string())),
    }
}

/// Extracts a construction year from date text.
///
/// # Errors
///
/// Returns [`DateParseError`] if the text is non-empty and unparseable.
pub fn parse_year_str(text: &str, default_format: &DateFormat) -> Result<Option<i32>, DateParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    if let Ok(n) = text.parse::<f64>() {
        return Ok(year_from_number(n));
    }

    detect_dialect(text, default_format)
        .or_else(|| parse_with_format(text, default_format))
        .map(|year| is_plausible_year(year).then_some(year))
        .ok_or_else(|| DateParseError(text.to_string()))
}

/// Interprets a number as a year or an epoch timestamp.
///
/// Magnitudes above 1e9 are Unix seconds, above 1e11 Unix milliseconds.
/// Anything else is truncated to a year.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn year_from_number(n: f64) -> Option<i32> {
    if !n.is_finite() {
        return None;
    }
    let year = if n.abs() > EPOCH_SECONDS_THRESHOLD {
        let seconds = if n.abs() > EPOCH_MILLIS_THRESHOLD {
            n / 1000.0
        } else {
            n
        };
        DateTime::from_timestamp(seconds.trunc() as i64, 0)?.year()
    } else {
        n.trunc() as i32
    };
    is_plausible_year(year).then_some(year)
}

fn detect_dialect(text: &str, default_format: &DateFormat) -> Option<i32> {
    if let Some(caps) = ISO_DATE.captures(text) {
        return valid_year(&caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = SLASHED_DATE.captures(text) {
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[2].parse().ok()?;
        let day_first = if first > 12 {
            true
        } else if second > 12 {
            false
        } else {
            *default_format == DateFormat::Eu
        };
        let (month, day) = if day_first {
            (&caps[2], &caps[1])
        } else {
            (&caps[1], &caps[2])
        };
        return valid_year(&caps[3], month, day);
    }
    if let Some(caps) = DOTTED_DATE.captures(text) {
        return valid_year(&caps[3], &caps[2], &caps[1]);
    }
    BARE_YEAR
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

fn valid_year(year: &str, month: &str, day: &str) -> Option<i32> {
    let year: i32 = year.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?).map(|d| d.year())
}

fn parse_with_format(text: &str, format: &DateFormat) -> Option<i32> {
    let DateFormat::Custom(pattern) = format else {
        return None;
    };
    NaiveDate::parse_from_str(text, pattern)
        .map(|d| d.year())
        .or_else(|_| NaiveDateTime::parse_from_str(text, pattern).map(|dt| dt.year()))
        .ok()
}

/// Reads a coordinate from a JSON number or numeric string.
///
/// Returns `None` if missing, unparseable, non-finite, or exactly zero
/// (the usual placeholder for "not geocoded").
#[must_use]
pub fn parse_coordinate(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n != 0.0).then_some(n)
}

/// Reads a non-negative number from a JSON number or numeric string.
///
/// Thousands separators are tolerated in strings (`"1,250"`).
#[must_use]
pub fn parse_non_negative(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}
