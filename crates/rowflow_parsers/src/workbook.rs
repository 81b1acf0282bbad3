//! Spreadsheet workbook parser (`.xlsx`, `.xls`).
//!
//! Operates over the selected sheet's used range and preserves native cell
//! types: booleans stay booleans, numbers come out as floating point,
//! datetime cells become timestamps, empty cells are null. Only string cells
//! go through textual classification during schema detection.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::{TimeZone, Utc};
use tracing::debug;

use rowflow_protocol::{
    ColumnDefinition, ColumnType, IngestError, ParsedRow, ParserOptions, RowData, Scalar,
    TableSchema,
};

use crate::infer::{classify, modal_type, parse_datetime, SAMPLE_LIMIT};
use crate::parser::{RowStream, TableParser};

const EXTENSIONS: &[&str] = &["xlsx", "xls"];

#[derive(Debug, Default)]
pub struct WorkbookParser;

impl WorkbookParser {
    fn open(bytes: &[u8]) -> Result<Sheets<Cursor<&[u8]>>, IngestError> {
        open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| IngestError::SchemaDetection(format!("failed to open workbook: {e}")))
    }

    /// Materialize the selected sheet's used range. `sheet_name` picks the
    /// sheet; absent or empty picks the first one.
    fn sheet_rows(bytes: &[u8], options: &ParserOptions) -> Result<Vec<Vec<Data>>, IngestError> {
        let mut workbook = Self::open(bytes)?;
        let name = match options.sheet_name.as_deref().filter(|s| !s.is_empty()) {
            Some(name) => name.to_owned(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| IngestError::SchemaDetection("workbook has no sheets".into()))?,
        };
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| IngestError::SchemaDetection(format!("sheet '{name}': {e}")))?;
        Ok(range.rows().map(|row| row.to_vec()).collect())
    }

    /// Column names plus the index of the first data row, after `skip_rows`
    /// and the optional header.
    fn layout(
        rows: &[Vec<Data>],
        options: &ParserOptions,
    ) -> Result<(Vec<String>, usize), IngestError> {
        let mut start = options.skip_rows.min(rows.len());
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);

        if options.has_header {
            let header = rows
                .get(start)
                .ok_or_else(|| IngestError::SchemaDetection("sheet has no header row".into()))?;
            start += 1;
            let names = (0..width)
                .map(|index| match header.get(index).map(header_cell) {
                    Some(name) if !name.is_empty() => name,
                    _ => ColumnDefinition::fallback_name(index),
                })
                .collect();
            Ok((names, start))
        } else {
            if rows.len() <= start {
                return Err(IngestError::SchemaDetection("sheet has no data rows".into()));
            }
            Ok(((0..width).map(ColumnDefinition::fallback_name).collect(), start))
        }
    }

    fn schema_from_rows(
        rows: &[Vec<Data>],
        options: &ParserOptions,
    ) -> Result<TableSchema, IngestError> {
        let (names, start) = Self::layout(rows, options)?;
        let data_rows = &rows[start..];

        let mut samples: Vec<Vec<ColumnType>> = vec![Vec::new(); names.len()];
        for row in data_rows.iter().take(SAMPLE_LIMIT) {
            for (index, column) in samples.iter_mut().enumerate() {
                if let Some(evidence) = row.get(index).and_then(cell_evidence) {
                    column.push(evidence);
                }
            }
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| ColumnDefinition::new(name, index, modal_type(&samples[index])))
            .collect::<Vec<_>>();

        debug!(columns = columns.len(), rows = data_rows.len(), "detected workbook schema");

        Ok(TableSchema {
            columns,
            estimated_row_count: data_rows.len() as u64,
        })
    }
}

impl TableParser for WorkbookParser {
    fn supported_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn detect_schema(
        &self,
        bytes: &[u8],
        options: &ParserOptions,
    ) -> Result<TableSchema, IngestError> {
        let rows = Self::sheet_rows(bytes, options)?;
        Self::schema_from_rows(&rows, options)
    }

    fn preview(
        &self,
        bytes: &[u8],
        options: &ParserOptions,
        rows: usize,
    ) -> Result<Vec<RowData>, IngestError> {
        let schema = self.detect_schema(bytes, options)?;
        let stream = self.parse_stream(bytes, options, &schema)?;
        Ok(stream
            .filter_map(|row| match row {
                ParsedRow::Row { data, .. } => Some(data),
                ParsedRow::Malformed { .. } => None,
            })
            .take(rows)
            .collect())
    }

    fn parse_stream<'a>(
        &self,
        bytes: &'a [u8],
        options: &ParserOptions,
        schema: &TableSchema,
    ) -> Result<RowStream<'a>, IngestError> {
        let rows = Self::sheet_rows(bytes, options)?;
        let (_, start) = Self::layout(&rows, options)?;
        let data_rows: Vec<Vec<Data>> = rows.into_iter().skip(start).collect();
        Ok(Box::new(WorkbookRows {
            rows: data_rows.into_iter(),
            columns: schema.columns.clone(),
            next_row: 1,
        }))
    }
}

struct WorkbookRows {
    rows: std::vec::IntoIter<Vec<Data>>,
    columns: Vec<ColumnDefinition>,
    next_row: u64,
}

impl Iterator for WorkbookRows {
    type Item = ParsedRow;

    fn next(&mut self) -> Option<ParsedRow> {
        let row = self.rows.next()?;
        let mut data = RowData::new();
        for column in &self.columns {
            let scalar = row.get(column.index).map(cell_to_scalar).unwrap_or(Scalar::Null);
            data.insert(column.name.clone(), scalar);
        }
        let row_number = self.next_row;
        self.next_row += 1;
        Some(ParsedRow::Row { row_number, data })
    }
}

/// Native cell value, preserved. Numbers are floating point; datetime cells
/// become UTC timestamps; duration cells come out as fractional days, the
/// serial form spreadsheets store them in; empty and error cells are null.
fn cell_to_scalar(cell: &Data) -> Scalar {
    match cell {
        Data::Empty | Data::Error(_) => Scalar::Null,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Scalar::Null
            } else {
                Scalar::Text(trimmed.to_owned())
            }
        }
        Data::Float(f) => Scalar::Float(*f),
        Data::Int(i) => Scalar::Float(*i as f64),
        Data::Bool(b) => Scalar::Bool(*b),
        Data::DateTime(dt) => {
            if dt.is_datetime() {
                match dt.as_datetime() {
                    Some(naive) => Scalar::Timestamp(Utc.from_utc_datetime(&naive)),
                    None => Scalar::Null,
                }
            } else {
                Scalar::Float(dt.as_f64())
            }
        }
        Data::DateTimeIso(s) => parse_datetime(s)
            .map(Scalar::Timestamp)
            .unwrap_or_else(|| Scalar::Text(s.clone())),
        Data::DurationIso(s) => parse_iso_duration_days(s)
            .map(Scalar::Float)
            .unwrap_or_else(|| Scalar::Text(s.clone())),
    }
}

/// ISO 8601 duration to fractional days, the serial form spreadsheets use
/// for durations. Year and month components have no fixed day length and
/// make the duration unparseable.
fn parse_iso_duration_days(value: &str) -> Option<f64> {
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let rest = rest.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut days = 0.0f64;
    let mut seen = false;
    for (number, unit) in duration_components(date_part)? {
        days += match unit {
            'W' => number * 7.0,
            'D' => number,
            _ => return None,
        };
        seen = true;
    }
    for (number, unit) in duration_components(time_part)? {
        days += match unit {
            'H' => number / 24.0,
            'M' => number / 1_440.0,
            'S' => number / 86_400.0,
            _ => return None,
        };
        seen = true;
    }
    if !seen {
        return None;
    }
    Some(if negative { -days } else { days })
}

fn duration_components(part: &str) -> Option<Vec<(f64, char)>> {
    let mut components = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            if number.is_empty() {
                return None;
            }
            components.push((number.parse().ok()?, c.to_ascii_uppercase()));
            number.clear();
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(components)
}

/// Type evidence for schema detection. Typed cells map directly; string
/// cells are classified textually; empty and error cells carry none.
fn cell_evidence(cell: &Data) -> Option<ColumnType> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(classify(trimmed))
            }
        }
        Data::Float(_) | Data::Int(_) => Some(ColumnType::Decimal),
        Data::Bool(_) => Some(ColumnType::Boolean),
        Data::DateTime(dt) => Some(if dt.is_datetime() {
            ColumnType::DateTime
        } else {
            ColumnType::Decimal
        }),
        Data::DateTimeIso(_) => Some(ColumnType::DateTime),
        Data::DurationIso(_) => Some(ColumnType::Decimal),
    }
}

fn header_cell(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_owned(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Vec<Vec<Data>> {
        vec![
            vec![Data::Bool(true), Data::Float(42.0)],
            vec![Data::Bool(false), Data::Float(3.14)],
        ]
    }

    #[test]
    fn native_cells_drive_inference() {
        let schema = WorkbookParser::schema_from_rows(&sheet(), &ParserOptions::default()).unwrap();
        assert_eq!(schema.column_names(), vec!["Column1", "Column2"]);
        assert_eq!(schema.columns[0].detected_type, ColumnType::Boolean);
        assert_eq!(schema.columns[1].detected_type, ColumnType::Decimal);
        assert_eq!(schema.estimated_row_count, 2);
    }

    #[test]
    fn typed_cells_are_preserved() {
        let rows = sheet();
        let options = ParserOptions::default();
        let schema = WorkbookParser::schema_from_rows(&rows, &options).unwrap();
        let (_, start) = WorkbookParser::layout(&rows, &options).unwrap();
        let parsed: Vec<_> = WorkbookRows {
            rows: rows.into_iter().skip(start).collect::<Vec<_>>().into_iter(),
            columns: schema.columns,
            next_row: 1,
        }
        .collect();

        assert_eq!(parsed.len(), 2);
        match &parsed[0] {
            ParsedRow::Row { row_number, data } => {
                assert_eq!(*row_number, 1);
                assert_eq!(data["Column1"], Scalar::Bool(true));
                assert_eq!(data["Column2"], Scalar::Float(42.0));
            }
            other => panic!("expected row, got {other:?}"),
        }
        match &parsed[1] {
            ParsedRow::Row { data, .. } => {
                assert_eq!(data["Column1"], Scalar::Bool(false));
                assert_eq!(data["Column2"], Scalar::Float(3.14));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn header_row_names_columns() {
        let rows = vec![
            vec![Data::String("name".into()), Data::String(" age ".into())],
            vec![Data::String("ada".into()), Data::Float(36.0)],
        ];
        let options = ParserOptions {
            has_header: true,
            ..ParserOptions::default()
        };
        let schema = WorkbookParser::schema_from_rows(&rows, &options).unwrap();
        assert_eq!(schema.column_names(), vec!["name", "age"]);
        assert_eq!(schema.estimated_row_count, 1);
        assert_eq!(schema.columns[0].detected_type, ColumnType::String);
        assert_eq!(schema.columns[1].detected_type, ColumnType::Decimal);
    }

    #[test]
    fn empty_and_error_cells_are_null_without_evidence() {
        assert_eq!(cell_to_scalar(&Data::Empty), Scalar::Null);
        assert_eq!(cell_evidence(&Data::Empty), None);
        assert_eq!(
            cell_to_scalar(&Data::String("   ".into())),
            Scalar::Null
        );
    }

    #[test]
    fn string_cells_are_trimmed() {
        assert_eq!(
            cell_to_scalar(&Data::String("  hi  ".into())),
            Scalar::Text("hi".into())
        );
    }

    #[test]
    fn iso_datetime_cells_become_timestamps() {
        match cell_to_scalar(&Data::DateTimeIso("2024-03-01T10:00:00".into())) {
            Scalar::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00"),
            other => panic!("expected timestamp, got {other:?}"),
        }
        assert_eq!(
            cell_evidence(&Data::DateTimeIso("2024-03-01T10:00:00".into())),
            Some(ColumnType::DateTime)
        );
    }

    #[test]
    fn duration_cells_become_fractional_days() {
        assert_eq!(
            cell_to_scalar(&Data::DurationIso("PT12H".into())),
            Scalar::Float(0.5)
        );
        assert_eq!(
            cell_to_scalar(&Data::DurationIso("P1DT6H".into())),
            Scalar::Float(1.25)
        );
        assert_eq!(
            cell_to_scalar(&Data::DurationIso("PT90M".into())),
            Scalar::Float(0.0625)
        );
        assert_eq!(
            cell_to_scalar(&Data::DurationIso("-PT12H".into())),
            Scalar::Float(-0.5)
        );
        assert_eq!(
            cell_evidence(&Data::DurationIso("PT12H".into())),
            Some(ColumnType::Decimal)
        );
    }

    #[test]
    fn unparseable_durations_stay_text() {
        // A month has no fixed day length.
        assert_eq!(
            cell_to_scalar(&Data::DurationIso("P1M".into())),
            Scalar::Text("P1M".into())
        );
        assert_eq!(
            cell_to_scalar(&Data::DurationIso("P".into())),
            Scalar::Text("P".into())
        );
    }

    #[test]
    fn skip_rows_applies_to_the_used_range() {
        let rows = vec![
            vec![Data::String("junk".into())],
            vec![Data::String("x".into())],
            vec![Data::Float(1.0)],
        ];
        let options = ParserOptions {
            has_header: true,
            skip_rows: 1,
            ..ParserOptions::default()
        };
        let schema = WorkbookParser::schema_from_rows(&rows, &options).unwrap();
        assert_eq!(schema.column_names(), vec!["x"]);
        assert_eq!(schema.estimated_row_count, 1);
    }
}
