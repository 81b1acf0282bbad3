//! Schema detection: parser lookup plus sampling-mode invocation.

use std::sync::Arc;

use rowflow_protocol::{IngestError, ParserOptions, TableSchema};

use crate::registry::ParserRegistry;

/// Thin composition over the registry. Sources are in-memory bytes, so after
/// detection the same slice is handed to the streaming parse at position 0;
/// there is no reader state to rewind.
pub struct SchemaDetector {
    registry: Arc<ParserRegistry>,
}

impl SchemaDetector {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self { registry }
    }

    pub fn detect(
        &self,
        file_name: &str,
        bytes: &[u8],
        options: &ParserOptions,
    ) -> Result<TableSchema, IngestError> {
        let parser = self.registry.resolve(file_name)?;
        parser.detect_schema(bytes, options)
    }
}
