use crate::extract::Table;
use crate::schema::ColumnModel;
use crate::writer::TableSink;
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes records to one JSON Lines file per entity, `{entity}.jsonl`
///
/// Every object carries all columns of its entity; absent values are `null`.
pub struct JsonLinesWriter {
    output_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl JsonLinesWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        JsonLinesWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
        }
    }

    pub fn table_path(&self, entity: &str) -> PathBuf {
        self.output_dir.join(format!("{entity}.jsonl"))
    }

    fn writer(&mut self, entity: &str) -> Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(entity) {
            let path = self.table_path(entity);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            self.writers.insert(entity.to_string(), BufWriter::new(file));
        }
        self.writers
            .get_mut(entity)
            .context("writer was just inserted")
    }

    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

impl TableSink for JsonLinesWriter {
    fn write_tables(&mut self, tables: &[Table], columns: &ColumnModel) -> Result<()> {
        for table in tables {
            let order = columns.column_order(&table.entity);
            let writer = self.writer(&table.entity)?;
            for record in &table.records {
                let row: Map<String, Value> = order
                    .iter()
                    .map(|c| (c.clone(), record.data.get(c).cloned().unwrap_or(Value::Null)))
                    .collect();
                let json = serde_json::to_string(&row).context("Failed to serialize record")?;
                writeln!(writer, "{json}").context("Failed to write record")?;
            }
        }
        self.flush()
    }

    fn finish(&mut self) -> Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Record, RecordKey};
    use crate::schema::CompiledSchema;
    use serde_json::json;

    #[test]
    fn test_records_carry_every_column() {
        let dir = tempfile::tempdir().unwrap();
        let schema = CompiledSchema::from_yaml_str(
            "patent:\n  <entity>: patent\n  <primary_key>: ./number\n  <fields>:\n    ./title: title\n    ./kind: kind\n",
        )
        .unwrap();

        let mut record = Record::new("patent").with_id(RecordKey::new("US1"));
        record.set("title", Some("Widget".to_string()));
        let table = Table {
            entity: "patent".to_string(),
            records: vec![record],
        };

        let mut writer = JsonLinesWriter::new(dir.path());
        writer.write_tables(&[table], schema.columns()).unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(writer.table_path("patent")).unwrap();
        let rows: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows, [json!({"id": "US1", "title": "Widget", "kind": null})]);
    }
}
