//! Output sinks for flushed tables
//!
//! Every sink receives whole tables together with the compiled column model,
//! so each table is written with its full, stable column list even though the
//! records themselves are sparse.

pub mod delimited;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod database;

pub use delimited::CsvWriter;
pub use jsonl::JsonLinesWriter;
#[cfg(feature = "sqlite")]
pub use database::SqliteWriter;

use crate::config::OutputKind;
use crate::extract::Table;
use crate::schema::ColumnModel;
use anyhow::{Context, Result};
use std::path::Path;

/// Destination for the tables of one flush
pub trait TableSink {
    /// Append the records of every table, creating tables as needed
    fn write_tables(&mut self, tables: &[Table], columns: &ColumnModel) -> Result<()>;

    /// Called once after the last flush
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open the sink for an output kind, creating the output directory
pub fn open_sink(kind: OutputKind, output_dir: &Path) -> Result<Box<dyn TableSink>> {
    std::fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create output directory: {}", output_dir.display())
    })?;

    match kind {
        OutputKind::Csv => Ok(Box::new(CsvWriter::new(output_dir))),
        OutputKind::Jsonl => Ok(Box::new(JsonLinesWriter::new(output_dir))),
        #[cfg(feature = "sqlite")]
        OutputKind::Sqlite => Ok(Box::new(SqliteWriter::open(output_dir)?)),
        #[cfg(not(feature = "sqlite"))]
        OutputKind::Sqlite => anyhow::bail!("this build does not include SQLite output"),
    }
}
