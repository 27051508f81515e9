//! # xmltab - XML corpora to relational tables
//!
//! Converts streams of concatenated XML documents (bulk patent and
//! publication archives) into flat tables, driven by a declarative YAML
//! schema of relative paths, column names and nested entity definitions.
//!
//! ## Modules
//!
//! - **schema**: Load and validate the YAML schema, precompute column order
//! - **segment**: Split a concatenated stream into documents
//! - **dtd**: Resolve DTDs, expand entities and parse documents
//! - **extract**: Walk documents into keyed records and buffer them per table
//! - **writer**: CSV, SQLite and JSON Lines sinks
//! - **runner**: The per-file conversion loop and error policy
//!
//! ## Quick Start
//!
//! ```rust
//! use xmltab::schema::CompiledSchema;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let schema = CompiledSchema::from_yaml_str(r#"
//! grant:
//!   <entity>: patent
//!   <primary_key>: ./number
//!   <fields>:
//!     ./title: title
//!     ./inventor:
//!       <entity>: inventor
//!       <fields>:
//!         ./name: name
//! "#)?;
//!
//! let stream = "<?xml version=\"1.0\"?>\n\
//!     <grant><number>US1</number><title>Widget</title>\n\
//!     <inventor><name>Ada</name></inventor></grant>\n";
//!
//! let tables = xmltab::tabulate_reader(stream.as_bytes(), &schema, "grants.xml")?;
//! assert_eq!(tables[0].entity, "inventor");
//! assert_eq!(
//!     serde_json::Value::Object(tables[0].records[0].data.clone()),
//!     json!({"id": "US1_0", "patent_id": "US1", "name": "Ada"})
//! );
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::io::BufRead;

pub mod config;
pub mod dtd;
pub mod error;
pub mod extract;
pub mod logging;
pub mod path;
pub mod runner;
pub mod schema;
pub mod segment;
pub mod writer;

pub use config::{OutputKind, TabulateConfig};
pub use error::{DocumentError, SchemaError, SegmentationWarning};
pub use extract::{Record, RecordKey, Table, TableAccumulator};
pub use runner::{run, RunSummary, Tabulator};
pub use schema::CompiledSchema;

/// Convert an in-memory stream of concatenated documents into tables
///
/// Documents are parsed without a DTD directory and the first failing
/// document aborts the conversion. Wrapper documents are skipped.
pub fn tabulate_reader<R: BufRead>(
    reader: R,
    schema: &CompiledSchema,
    file_name: &str,
) -> Result<Vec<Table>> {
    let mut resolver = dtd::DtdResolver::default();
    let extractor = extract::Extractor::new(schema);
    let mut tables = TableAccumulator::new();
    let context = extract::DocumentContext { file_name };

    for segment in segment::Segments::new(reader, segment::SegmenterConfig::default()) {
        match segment.context("Failed to read input")? {
            segment::Segment::Document(raw) => {
                let prepared = resolver.prepare(&raw.text);
                let doc = prepared.parse()?;
                extractor
                    .process_document(&doc, &context, &mut tables)
                    .with_context(|| format!("Document at line {}", raw.start_line))?;
            }
            segment::Segment::Wrapper { .. } => {}
            segment::Segment::Malformed(warning) => return Err(warning.into()),
        }
    }
    Ok(tables.flush())
}
