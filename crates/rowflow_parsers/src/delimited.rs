//! Delimited text parser (`.csv`, `.tsv`, `.txt`).

use std::io::Cursor;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use tracing::debug;

use rowflow_protocol::{
    ColumnDefinition, ColumnType, IngestError, ParsedRow, ParserOptions, RowData, TableSchema,
};

use crate::infer::{classify, coerce, modal_type, SAMPLE_LIMIT};
use crate::parser::{RowStream, TableParser};

const EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

/// Parses delimiter-separated text with a configurable delimiter. The header
/// is read manually (the csv reader runs headerless) so `skip_rows` can drop
/// leading junk before the header line, and so ragged rows surface as
/// malformed rows instead of aborting the reader.
#[derive(Debug, Default)]
pub struct DelimitedParser;

impl DelimitedParser {
    fn records<'a>(
        bytes: &'a [u8],
        options: &ParserOptions,
    ) -> Result<StringRecordsIntoIter<Cursor<&'a [u8]>>, IngestError> {
        if !options.delimiter.is_ascii() {
            return Err(IngestError::SchemaDetection(format!(
                "delimiter must be a single ASCII character, got '{}'",
                options.delimiter
            )));
        }
        let reader = ReaderBuilder::new()
            .delimiter(options.delimiter as u8)
            .has_headers(false)
            .flexible(true)
            .from_reader(Cursor::new(bytes));
        Ok(reader.into_records())
    }

    /// Consume skipped rows and the header (when configured), returning the
    /// column names. Headerless files name columns positionally after the
    /// first data row, which is handed back so it is not lost.
    fn read_layout(
        records: &mut StringRecordsIntoIter<Cursor<&[u8]>>,
        options: &ParserOptions,
    ) -> Result<(Vec<String>, Option<StringRecord>), IngestError> {
        for _ in 0..options.skip_rows {
            if records.next().is_none() {
                break;
            }
        }

        if options.has_header {
            let header = records
                .next()
                .ok_or_else(|| IngestError::SchemaDetection("file has no header row".into()))?
                .map_err(|e| IngestError::SchemaDetection(format!("unreadable header row: {e}")))?;
            let names = header
                .iter()
                .enumerate()
                .map(|(index, cell)| {
                    let trimmed = cell.trim();
                    if trimmed.is_empty() {
                        ColumnDefinition::fallback_name(index)
                    } else {
                        trimmed.to_owned()
                    }
                })
                .collect();
            Ok((names, None))
        } else {
            let first = records
                .next()
                .ok_or_else(|| IngestError::SchemaDetection("file has no data rows".into()))?
                .map_err(|e| IngestError::SchemaDetection(format!("unreadable first row: {e}")))?;
            let names = (0..first.len()).map(ColumnDefinition::fallback_name).collect();
            Ok((names, Some(first)))
        }
    }
}

impl TableParser for DelimitedParser {
    fn supported_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn detect_schema(
        &self,
        bytes: &[u8],
        options: &ParserOptions,
    ) -> Result<TableSchema, IngestError> {
        let mut records = Self::records(bytes, options)?;
        let (names, first_data) = Self::read_layout(&mut records, options)?;

        let mut samples: Vec<Vec<ColumnType>> = vec![Vec::new(); names.len()];
        let mut row_count = 0u64;
        let mut sampled = 0usize;

        let rest = first_data.into_iter().map(Ok).chain(records);
        for record in rest {
            row_count += 1;
            let Ok(record) = record else {
                continue;
            };
            // Ragged rows become malformed rows during streaming; they carry
            // no type evidence.
            if record.len() != names.len() || sampled >= SAMPLE_LIMIT {
                continue;
            }
            sampled += 1;
            for (column, cell) in samples.iter_mut().zip(record.iter()) {
                let trimmed = cell.trim();
                if !trimmed.is_empty() {
                    column.push(classify(trimmed));
                }
            }
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| ColumnDefinition::new(name, index, modal_type(&samples[index])))
            .collect::<Vec<_>>();

        debug!(
            columns = columns.len(),
            rows = row_count,
            "detected delimited schema"
        );

        Ok(TableSchema {
            columns,
            estimated_row_count: row_count,
        })
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
        let mut records = Self::records(bytes, options)?;
        for _ in 0..options.skip_rows {
            if records.next().is_none() {
                break;
            }
        }
        if options.has_header {
            records.next();
        }
        Ok(Box::new(DelimitedRows {
            records,
            columns: schema.columns.clone(),
            next_row: 1,
        }))
    }
}

struct DelimitedRows<'a> {
    records: StringRecordsIntoIter<Cursor<&'a [u8]>>,
    columns: Vec<ColumnDefinition>,
    next_row: u64,
}

impl Iterator for DelimitedRows<'_> {
    type Item = ParsedRow;

    fn next(&mut self) -> Option<ParsedRow> {
        let record = self.records.next()?;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                return Some(ParsedRow::Malformed {
                    message: e.to_string(),
                })
            }
        };
        if record.len() != self.columns.len() {
            return Some(ParsedRow::Malformed {
                message: format!(
                    "expected {} fields, got {}",
                    self.columns.len(),
                    record.len()
                ),
            });
        }

        let mut data = RowData::new();
        for column in &self.columns {
            let raw = record.get(column.index).unwrap_or("");
            data.insert(column.name.clone(), coerce(raw, column.detected_type));
        }
        let row_number = self.next_row;
        self.next_row += 1;
        Some(ParsedRow::Row { row_number, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_protocol::Scalar;

    fn comma() -> ParserOptions {
        ParserOptions {
            delimiter: ',',
            has_header: true,
            ..ParserOptions::default()
        }
    }

    fn parse_all(bytes: &[u8], options: &ParserOptions) -> (TableSchema, Vec<ParsedRow>) {
        let parser = DelimitedParser;
        let schema = parser.detect_schema(bytes, options).unwrap();
        let rows = parser
            .parse_stream(bytes, options, &schema)
            .unwrap()
            .collect();
        (schema, rows)
    }

    #[test]
    fn header_and_integer_columns() {
        let (schema, rows) = parse_all(b"a,b,c\n1,2,3\n4,5,6\n", &comma());
        assert_eq!(schema.column_names(), vec!["a", "b", "c"]);
        assert!(schema
            .columns
            .iter()
            .all(|c| c.detected_type == ColumnType::Integer));
        assert_eq!(schema.estimated_row_count, 2);

        assert_eq!(rows.len(), 2);
        match &rows[0] {
            ParsedRow::Row { row_number, data } => {
                assert_eq!(*row_number, 1);
                assert_eq!(data["a"], Scalar::Int(1));
                assert_eq!(data["b"], Scalar::Int(2));
                assert_eq!(data["c"], Scalar::Int(3));
            }
            other => panic!("expected row, got {other:?}"),
        }
        match &rows[1] {
            ParsedRow::Row { row_number, data } => {
                assert_eq!(*row_number, 2);
                assert_eq!(data["a"], Scalar::Int(4));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn weak_majority_falls_back_to_string() {
        // 2 of 3 samples are integers: 66.6% is under the 80% bar.
        let (schema, rows) = parse_all(b"x\n1\ntwo\n3\n", &comma());
        assert_eq!(schema.columns[0].detected_type, ColumnType::String);

        let values: Vec<_> = rows
            .iter()
            .map(|row| match row {
                ParsedRow::Row { data, .. } => data["x"].clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            values,
            vec![
                Scalar::Text("1".into()),
                Scalar::Text("two".into()),
                Scalar::Text("3".into()),
            ]
        );
    }

    #[test]
    fn ragged_rows_are_malformed_and_do_not_consume_numbers() {
        let (_, rows) = parse_all(b"a,b\n1,2\n3\n4,5\n", &comma());
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert!(!rows[1].is_ok());
        match &rows[2] {
            ParsedRow::Row { row_number, .. } => assert_eq!(*row_number, 2),
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn blank_header_cells_get_fabricated_names() {
        let (schema, _) = parse_all(b"a,,c\n1,2,3\n", &comma());
        assert_eq!(schema.column_names(), vec!["a", "Column2", "c"]);
    }

    #[test]
    fn headerless_files_use_positional_names() {
        let options = ParserOptions {
            delimiter: ',',
            ..ParserOptions::default()
        };
        let (schema, rows) = parse_all(b"10,20\n30,40\n", &options);
        assert_eq!(schema.column_names(), vec!["Column1", "Column2"]);
        assert_eq!(schema.estimated_row_count, 2);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn skip_rows_is_applied_before_the_header() {
        let options = ParserOptions {
            delimiter: ',',
            has_header: true,
            skip_rows: 2,
            ..ParserOptions::default()
        };
        let (schema, rows) =
            parse_all(b"junk line\nmore junk\na,b\n1,2\n", &options);
        assert_eq!(schema.column_names(), vec!["a", "b"]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn default_delimiter_is_semicolon() {
        let options = ParserOptions {
            has_header: true,
            ..ParserOptions::default()
        };
        let (schema, rows) = parse_all(b"a;b\n1;2\n", &options);
        assert_eq!(schema.column_names(), vec!["a", "b"]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn empty_cells_are_null() {
        let (_, rows) = parse_all(b"a,b\n1,\n", &comma());
        match &rows[0] {
            ParsedRow::Row { data, .. } => assert_eq!(data["b"], Scalar::Null),
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn preview_caps_and_skips_malformed() {
        let parser = DelimitedParser;
        let rows = parser
            .preview(b"a,b\n1,2\nbad\n3,4\n5,6\n", &comma(), 2)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["a"], Scalar::Int(1));
        assert_eq!(rows[1]["a"], Scalar::Int(3));
    }

    #[test]
    fn header_only_file_has_zero_rows() {
        let (schema, rows) = parse_all(b"a,b\n", &comma());
        assert_eq!(schema.estimated_row_count, 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn non_ascii_delimiter_is_rejected() {
        let options = ParserOptions {
            delimiter: '→',
            ..ParserOptions::default()
        };
        assert!(DelimitedParser.detect_schema(b"a\n", &options).is_err());
    }
}
