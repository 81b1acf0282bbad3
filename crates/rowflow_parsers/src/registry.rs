//! Parser selection by file extension.

use std::collections::BTreeMap;
use std::sync::Arc;

use rowflow_protocol::IngestError;

use crate::delimited::DelimitedParser;
use crate::parser::{file_extension, TableParser};
use crate::workbook::WorkbookParser;

/// Maps lowercased extensions to parsers. Adding a format is one `register`
/// call; the engine never changes.
pub struct ParserRegistry {
    parsers: BTreeMap<String, Arc<dyn TableParser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in delimited and workbook parsers.
    pub fn with_default_parsers() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DelimitedParser));
        registry.register(Arc::new(WorkbookParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn TableParser>) {
        for extension in parser.supported_extensions() {
            self.parsers
                .insert(extension.to_lowercase(), Arc::clone(&parser));
        }
    }

    /// Find the parser for a file name, matching the extension
    /// case-insensitively.
    pub fn resolve(&self, file_name: &str) -> Result<Arc<dyn TableParser>, IngestError> {
        let extension = file_extension(file_name).unwrap_or_default();
        self.parsers
            .get(&extension)
            .cloned()
            .ok_or_else(|| IngestError::UnsupportedFormat {
                extension,
                supported: self
                    .supported_extensions()
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Sorted union of every registered extension.
    pub fn supported_extensions(&self) -> Vec<String> {
        self.parsers.keys().cloned().collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_extensions_case_insensitively() {
        let registry = ParserRegistry::default();
        for name in ["a.csv", "a.TSV", "a.txt", "b.XLSX", "b.xls"] {
            assert!(registry.resolve(name).is_ok(), "failed to resolve {name}");
        }
    }

    #[test]
    fn unsupported_extension_names_the_accepted_set() {
        let registry = ParserRegistry::default();
        let err = registry.resolve("report.pdf").unwrap_err();
        match err {
            IngestError::UnsupportedFormat {
                extension,
                supported,
            } => {
                assert_eq!(extension, "pdf");
                for ext in [".csv", ".tsv", ".txt", ".xls", ".xlsx"] {
                    assert!(supported.contains(ext), "{supported} missing {ext}");
                }
            }
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn missing_extension_is_unsupported() {
        let registry = ParserRegistry::default();
        assert!(registry.resolve("no_extension").is_err());
    }

    #[test]
    fn extensions_are_sorted() {
        let registry = ParserRegistry::default();
        assert_eq!(
            registry.supported_extensions(),
            vec!["csv", "tsv", "txt", "xls", "xlsx"]
        );
    }
}
