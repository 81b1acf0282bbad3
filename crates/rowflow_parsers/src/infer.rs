//! Type inference over string samples.
//!
//! `classify` decides what a single cell looks like; `modal_type` turns a
//! column's worth of evidence into one detected type; `coerce` converts a raw
//! cell into a [`Scalar`] according to the column's detected type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use rowflow_protocol::{ColumnType, Scalar};

/// Detection samples at most this many non-empty values per column.
pub const SAMPLE_LIMIT: usize = 100;

/// The modal type must cover at least this share of samples to win.
const MODAL_SHARE: f64 = 0.8;

/// Tie-break precedence: earlier wins.
const PRECEDENCE: &[ColumnType] = &[
    ColumnType::Integer,
    ColumnType::Decimal,
    ColumnType::Boolean,
    ColumnType::DateTime,
    ColumnType::Date,
    ColumnType::String,
];

/// Datetime layouts tried after RFC 3339, most common first.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Date-only layouts.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d.%m.%Y"];

/// Classify one cell. Empty or whitespace-only cells carry no evidence and
/// come back as `String`. First match in fixed order wins: integer, decimal,
/// boolean, datetime, date.
pub fn classify(sample: &str) -> ColumnType {
    let trimmed = sample.trim();
    if trimmed.is_empty() {
        return ColumnType::String;
    }
    if trimmed.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }
    if Decimal::from_str(trimmed).is_ok() {
        return ColumnType::Decimal;
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return ColumnType::Boolean;
    }
    if parse_datetime(trimmed).is_some() {
        return ColumnType::DateTime;
    }
    if parse_date(trimmed).is_some() {
        return ColumnType::Date;
    }
    ColumnType::String
}

/// Pick a column's type from classified samples: the modal type wins when it
/// covers at least 80% of the samples, ties broken by `PRECEDENCE`; anything
/// weaker falls back to `String`. No samples means no evidence: `String`.
pub fn modal_type(samples: &[ColumnType]) -> ColumnType {
    if samples.is_empty() {
        return ColumnType::String;
    }
    let (mut winner, mut winner_count) = (ColumnType::String, 0usize);
    for candidate in PRECEDENCE {
        let count = samples.iter().filter(|t| *t == candidate).count();
        if count > winner_count {
            winner = *candidate;
            winner_count = count;
        }
    }
    if winner_count as f64 >= samples.len() as f64 * MODAL_SHARE {
        winner
    } else {
        ColumnType::String
    }
}

/// Convert a raw delimited cell into a scalar according to the column's
/// detected type. Empty cells are null. A cell that does not parse as the
/// detected type stays text: the detector only sampled the head of the file,
/// so later rows may legitimately disagree.
pub fn coerce(raw: &str, detected: ColumnType) -> Scalar {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Scalar::Null;
    }
    match detected {
        ColumnType::Integer => trimmed
            .parse::<i64>()
            .map(Scalar::Int)
            .unwrap_or_else(|_| Scalar::Text(trimmed.to_owned())),
        ColumnType::Decimal => Decimal::from_str(trimmed)
            .map(Scalar::Decimal)
            .unwrap_or_else(|_| Scalar::Text(trimmed.to_owned())),
        ColumnType::Boolean => {
            if trimmed.eq_ignore_ascii_case("true") {
                Scalar::Bool(true)
            } else if trimmed.eq_ignore_ascii_case("false") {
                Scalar::Bool(false)
            } else {
                Scalar::Text(trimmed.to_owned())
            }
        }
        ColumnType::DateTime => parse_datetime(trimmed)
            .map(Scalar::Timestamp)
            .unwrap_or_else(|| Scalar::Text(trimmed.to_owned())),
        ColumnType::Date => parse_date(trimmed)
            .map(|d| Scalar::Timestamp(at_midnight(d)))
            .unwrap_or_else(|| Scalar::Text(trimmed.to_owned())),
        ColumnType::String | ColumnType::Unknown => Scalar::Text(trimmed.to_owned()),
    }
}

/// RFC 3339 first, then the locale-permissive layouts. Naive timestamps are
/// taken as UTC.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn at_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&NaiveDateTime::new(date, NaiveTime::MIN))
}
