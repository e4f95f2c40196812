//! Column type inference and value coercion for uploaded files.
//!
//! Inference looks at a bounded sample; later rows that disagree with the
//! inferred type are stored as `NULL` rather than failing the load.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Rows examined per column when inferring types.
pub const INFERENCE_SAMPLE_ROWS: usize = 500;

/// Canonical storage format for `DATETIME` cells.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inferred column type, named by its SQLite declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    DateTime,
    Text,
}

impl ColumnType {
    /// Declared type used in `CREATE TABLE`.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::DateTime => "DATETIME",
            Self::Text => "TEXT",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A coerced cell, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

struct NumberPatterns {
    integer: Regex,
    real: Regex,
}

// Patterns are literals
#[allow(clippy::expect_used)]
static PATTERNS: LazyLock<NumberPatterns> = LazyLock::new(|| NumberPatterns {
    integer: Regex::new(r"^[+-]?\d+$").expect("Invalid integer pattern"),
    real: Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("Invalid real pattern"),
});

impl NumberPatterns {
    fn instance() -> &'static Self {
        &PATTERNS
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    if NumberPatterns::instance().integer.is_match(value) {
        value.parse().ok()
    } else {
        None
    }
}

fn parse_real(value: &str) -> Option<f64> {
    if NumberPatterns::instance().real.is_match(value) {
        value.parse().ok()
    } else {
        None
    }
}

/// Boolean reading of a cell, and whether it used a word form.
fn parse_boolean(value: &str) -> Option<(bool, bool)> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => Some((true, true)),
        "false" | "no" => Some((false, true)),
        "1" => Some((true, false)),
        "0" => Some((false, false)),
        _ => None,
    }
}

/// Parses a timestamp, normalized to UTC for offset-bearing inputs.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Infers one column's type from its non-empty sample values.
pub fn infer_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let values: Vec<&str> = values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if values.is_empty() {
        return ColumnType::Text;
    }
    if values.iter().all(|v| parse_integer(v).is_some()) {
        return ColumnType::Integer;
    }
    if values.iter().all(|v| parse_real(v).is_some()) {
        return ColumnType::Real;
    }

    let booleans: Option<Vec<(bool, bool)>> = values.iter().map(|v| parse_boolean(v)).collect();
    if booleans.is_some_and(|b| b.iter().any(|(_, word)| *word)) {
        return ColumnType::Boolean;
    }

    if values.iter().all(|v| parse_datetime(v).is_some()) {
        return ColumnType::DateTime;
    }

    ColumnType::Text
}

/// Infers a type for each of `width` columns from the first
/// [`INFERENCE_SAMPLE_ROWS`] rows. Missing cells count as empty.
pub fn infer_column_types(rows: &[Vec<String>], width: usize) -> Vec<ColumnType> {
    let sample = &rows[..rows.len().min(INFERENCE_SAMPLE_ROWS)];
    (0..width)
        .map(|column| {
            infer_type(
                sample
                    .iter()
                    .map(|row| row.get(column).map_or("", String::as_str)),
            )
        })
        .collect()
}

/// Coerces a raw cell to `column_type`. Empty cells and failed coercions
/// become [`CellValue::Null`].
pub fn coerce(raw: &str, column_type: ColumnType) -> CellValue {
    let value = raw.trim();
    if value.is_empty() {
        return CellValue::Null;
    }

    match column_type {
        ColumnType::Integer => parse_integer(value).map_or(CellValue::Null, CellValue::Integer),
        ColumnType::Real => parse_real(value).map_or(CellValue::Null, CellValue::Real),
        ColumnType::Boolean => parse_boolean(value)
            .map_or(CellValue::Null, |(b, _)| CellValue::Integer(i64::from(b))),
        ColumnType::DateTime => parse_datetime(value).map_or(CellValue::Null, |dt| {
            CellValue::Text(dt.format(DATETIME_FORMAT).to_string())
        }),
        ColumnType::Text => CellValue::Text(raw.to_string()),
    }
}
