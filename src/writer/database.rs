use crate::extract::Table;
use crate::schema::ColumnModel;
use crate::writer::TableSink;
use anyhow::{Context, Result};
use log::{debug, warn};
use rusqlite::{params_from_iter, Connection, Transaction};
use std::path::{Path, PathBuf};

pub const DATABASE_FILE: &str = "db.sqlite";

/// Inserts every flush into `db.sqlite` inside a single transaction
///
/// Tables are created on first use with the compiled column order. Entities
/// with an `id` column get it as a non-null text primary key, so duplicate
/// keys abort the run. Columns missing from an existing table are added.
pub struct SqliteWriter {
    path: PathBuf,
    conn: Connection,
}

impl SqliteWriter {
    pub fn open<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let path = output_dir.as_ref().join(DATABASE_FILE);
        if path.exists() {
            warn!("{} already exists; records will be appended", path.display());
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(SqliteWriter { path, conn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn existing_columns(tx: &Transaction<'_>, table: &str) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn ensure_table(tx: &Transaction<'_>, entity: &str, columns: &ColumnModel) -> Result<()> {
    let order = columns.column_order(entity);
    let declared = columns.get(entity);
    let column_def = |name: &str| {
        if name == "id" {
            return format!("{} TEXT NOT NULL PRIMARY KEY", quote(name));
        }
        let sql_type = declared.and_then(|c| c.sql_type(name)).unwrap_or("TEXT");
        format!("{} {}", quote(name), sql_type)
    };

    let existing = existing_columns(tx, entity)?;
    if existing.is_empty() {
        let defs: Vec<String> = order.iter().map(|c| column_def(c.as_str())).collect();
        let sql = format!("CREATE TABLE {} ({})", quote(entity), defs.join(", "));
        debug!("{sql}");
        tx.execute_batch(&sql)
            .with_context(|| format!("Failed to create table {entity}"))?;
        return Ok(());
    }

    for name in order.iter().filter(|c| !existing.contains(*c)) {
        // SQLite cannot add a primary key to an existing table
        let def = if name == "id" {
            format!("{} TEXT", quote(name))
        } else {
            column_def(name.as_str())
        };
        let sql = format!("ALTER TABLE {} ADD COLUMN {}", quote(entity), def);
        debug!("{sql}");
        tx.execute_batch(&sql)
            .with_context(|| format!("Failed to add column {name} to {entity}"))?;
    }
    Ok(())
}

fn insert_table(tx: &Transaction<'_>, table: &Table, columns: &ColumnModel) -> Result<()> {
    let order = columns.column_order(&table.entity);
    if order.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = order.iter().map(|c| quote(c)).collect();
    let slots: Vec<String> = (1..=order.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&table.entity),
        names.join(", "),
        slots.join(", ")
    );

    let mut stmt = tx.prepare(&sql)?;
    for record in &table.records {
        stmt.execute(params_from_iter(order.iter().map(|c| record.get(c))))
            .with_context(|| {
                format!(
                    "Failed to insert into {} (id {})",
                    table.entity,
                    record.get("id").unwrap_or("none")
                )
            })?;
    }
    Ok(())
}

impl TableSink for SqliteWriter {
    fn write_tables(&mut self, tables: &[Table], columns: &ColumnModel) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table in tables {
            if columns.column_order(&table.entity).is_empty() {
                debug!("Skipping {}: no columns to store", table.entity);
                continue;
            }
            ensure_table(&tx, &table.entity, columns)?;
            insert_table(&tx, table, columns)?;
        }
        tx.commit().context("Failed to commit flush")?;
        Ok(())
    }
}
