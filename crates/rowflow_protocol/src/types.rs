//! Column, schema, row, and option types shared by parsers, stores, and the
//! engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JobId;

/// Default cell delimiter for delimited text files.
pub const DEFAULT_DELIMITER: char = ';';
/// Default number of records per bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default number of rows returned by a preview.
pub const DEFAULT_PREVIEW_ROWS: usize = 10;

// ============================================================================
// Column types
// ============================================================================

/// Closed set of types a column can be detected as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
    DateTime,
    Date,
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::DateTime => "datetime",
            ColumnType::Date => "date",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ColumnType::String),
            "integer" => Ok(ColumnType::Integer),
            "decimal" => Ok(ColumnType::Decimal),
            "boolean" => Ok(ColumnType::Boolean),
            "datetime" => Ok(ColumnType::DateTime),
            "date" => Ok(ColumnType::Date),
            "unknown" => Ok(ColumnType::Unknown),
            other => Err(format!("unknown column type: {other}")),
        }
    }
}

// ============================================================================
// Scalar values
// ============================================================================

/// Dynamically typed cell value.
///
/// Serializes to plain JSON so a persisted `data` payload is an ordinary JSON
/// object: `Null` -> null, `Bool` -> bool, `Int`/`Float` -> number,
/// `Decimal` -> string (exactness over convenience), `Timestamp` -> RFC 3339
/// string. JSON has fewer types than we do, so deserialization maps numbers
/// back to `Int`/`Float` and every string to `Text`.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Human-readable rendering, used for display and substring search.
    /// `None` for null values, which never match a search.
    pub fn render(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(v) => Some(v.to_string()),
            Scalar::Int(v) => Some(v.to_string()),
            Scalar::Float(v) => Some(v.to_string()),
            Scalar::Decimal(v) => Some(v.to_string()),
            Scalar::Text(v) => Some(v.clone()),
            Scalar::Timestamp(v) => Some(v.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Bool(v) => serializer.serialize_bool(*v),
            Scalar::Int(v) => serializer.serialize_i64(*v),
            Scalar::Float(v) => serializer.serialize_f64(*v),
            Scalar::Decimal(v) => serializer.serialize_str(&v.to_string()),
            Scalar::Text(v) => serializer.serialize_str(v),
            Scalar::Timestamp(v) => serializer.serialize_str(&v.to_rfc3339()),
        }
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(Scalar::Null),
            serde_json::Value::Bool(v) => Ok(Scalar::Bool(v)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Scalar::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Scalar::Float(f))
                } else {
                    Err(de::Error::custom(format!("unrepresentable number: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Scalar::Text(s)),
            other => Err(de::Error::custom(format!(
                "expected a scalar JSON value, got {other}"
            ))),
        }
    }
}

/// One parsed row's payload: column name -> nullable scalar.
pub type RowData = BTreeMap<String, Scalar>;

// ============================================================================
// Schema
// ============================================================================

/// One detected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Non-empty; blank header cells are fabricated as `Column{n}` (1-based).
    pub name: String,
    /// Zero-based position, dense over `[0, column_count)`.
    pub index: usize,
    pub detected_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_ignored: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, index: usize, detected_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            index,
            detected_type,
            display_name: None,
            is_ignored: false,
        }
    }

    /// Fallback name for a blank or absent header cell.
    pub fn fallback_name(index: usize) -> String {
        format!("Column{}", index + 1)
    }
}

/// Output of schema detection. Fixed before the first row is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDefinition>,
    /// Exact for in-memory sources: detection exhausts the stream.
    pub estimated_row_count: u64,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Persisted form of a job's schema. Exactly one per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub file_name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl SchemaRecord {
    pub fn new(job_id: JobId, file_name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            file_name: file_name.into(),
            columns,
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// One persisted row of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub job_id: JobId,
    /// 1-based, assigned in parse order, gapless across a job's successful
    /// rows.
    pub row_number: u64,
    pub data: RowData,
}

impl Record {
    pub fn new(job_id: JobId, row_number: u64, data: RowData) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            row_number,
            data,
        }
    }
}

/// Outcome of parsing a single row. Parsers emit `Malformed` and keep going;
/// a bad row never aborts the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    Row { row_number: u64, data: RowData },
    Malformed { message: String },
}

impl ParsedRow {
    pub fn is_ok(&self) -> bool {
        matches!(self, ParsedRow::Row { .. })
    }
}

// ============================================================================
// Parser options
// ============================================================================

/// Caller-supplied knobs for parsing. All fields have serviceable defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    pub delimiter: char,
    pub has_header: bool,
    pub skip_rows: usize,
    /// Records per bulk insert. Must be > 0.
    pub batch_size: usize,
    /// Workbook sheet to read; absent or empty selects the first sheet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    /// Rows returned by `preview`. Must be > 0.
    pub preview_rows: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            has_header: false,
            skip_rows: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            sheet_name: None,
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}
