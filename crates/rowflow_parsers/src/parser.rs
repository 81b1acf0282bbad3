//! The parser capability set.

use std::path::Path;

use rowflow_protocol::{IngestError, ParsedRow, ParserOptions, RowData, TableSchema};

/// Lazy sequence of parsed rows. Rows are pulled one at a time; the producer
/// side of the ingestion pipeline drives this under backpressure.
pub type RowStream<'a> = Box<dyn Iterator<Item = ParsedRow> + Send + 'a>;

/// A format-specific parser. Sources are in-memory byte slices (tasks carry
/// whole files), so every source is seekable: `detect_schema` and
/// `parse_stream` each read the same bytes from the start.
pub trait TableParser: Send + Sync + std::fmt::Debug {
    /// Lowercased extensions, without the dot.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Case-insensitive extension match.
    fn can_handle(&self, file_name: &str) -> bool {
        match file_extension(file_name) {
            Some(ext) => self.supported_extensions().contains(&ext.as_str()),
            None => false,
        }
    }

    /// Sampling mode: infer column names and types from the head of the data
    /// and exhaust the stream for an exact row count.
    fn detect_schema(
        &self,
        bytes: &[u8],
        options: &ParserOptions,
    ) -> Result<TableSchema, IngestError>;

    /// First `rows` successfully parsed rows.
    fn preview(
        &self,
        bytes: &[u8],
        options: &ParserOptions,
        rows: usize,
    ) -> Result<Vec<RowData>, IngestError>;

    /// Full streaming parse. `schema` is the contract with detection: cell
    /// values are keyed (and, for delimited text, typed) by its columns.
    /// Honors `skip_rows` ahead of the header; `row_number` is 1-based over
    /// successfully yielded rows.
    fn parse_stream<'a>(
        &self,
        bytes: &'a [u8],
        options: &ParserOptions,
        schema: &TableSchema,
    ) -> Result<RowStream<'a>, IngestError>;
}

/// Lowercased extension of a file name, without the dot.
pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Data.CSV").as_deref(), Some("csv"));
        assert_eq!(file_extension("report.xlsx").as_deref(), Some("xlsx"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
    }
}
