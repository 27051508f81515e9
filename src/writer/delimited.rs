use crate::extract::Table;
use crate::schema::ColumnModel;
use crate::writer::TableSink;
use anyhow::{Context, Result};
use log::debug;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Appends each table to `{entity}.csv` in the output directory
///
/// The header row is written only when the file is new (or empty). Absent
/// and null values are both written as empty strings.
pub struct CsvWriter {
    output_dir: PathBuf,
}

impl CsvWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        CsvWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn table_path(&self, entity: &str) -> PathBuf {
        self.output_dir.join(format!("{entity}.csv"))
    }
}

impl TableSink for CsvWriter {
    fn write_tables(&mut self, tables: &[Table], columns: &ColumnModel) -> Result<()> {
        for table in tables {
            let path = self.table_path(&table.entity);
            let needs_header = std::fs::metadata(&path).map_or(true, |m| m.len() == 0);
            if !needs_header {
                debug!("Appending to existing {}", path.display());
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            let mut writer = csv::Writer::from_writer(file);

            let order = columns.column_order(&table.entity);
            if needs_header {
                writer
                    .write_record(order)
                    .with_context(|| format!("Failed to write header: {}", path.display()))?;
            }
            for record in &table.records {
                writer
                    .write_record(order.iter().map(|c| record.get(c).unwrap_or("")))
                    .with_context(|| format!("Failed to write record: {}", path.display()))?;
            }
            writer
                .flush()
                .with_context(|| format!("Failed to flush writer: {}", path.display()))?;
        }
        Ok(())
    }
}
