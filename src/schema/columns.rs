//! Stable per-entity column order
//!
//! Sinks need the full column universe of each table up front, while records
//! are sparse. The column list of an entity is the first-seen order of the
//! columns reached by a depth-first walk of the schema, merged across every
//! schema entry that feeds the same entity.

use crate::schema::field::{Column, FieldSpec};
use crate::schema::SchemaEntry;
use std::collections::HashMap;

/// Ordered columns of one output table
#[derive(Debug, Clone, Default)]
pub struct EntityColumns {
    pub columns: Vec<String>,
    sql_types: HashMap<String, String>,
}

impl EntityColumns {
    /// SQL type hint declared for a column (`name:TYPE`), if any
    pub fn sql_type(&self, column: &str) -> Option<&str> {
        self.sql_types.get(column).map(String::as_str)
    }

    /// Order-preserving union: known names keep their position, new ones append
    fn merge(&mut self, contribution: Vec<Column>) {
        for column in contribution {
            if let Some(sql_type) = column.sql_type {
                self.sql_types.entry(column.name.clone()).or_insert(sql_type);
            }
            if !self.columns.contains(&column.name) {
                self.columns.push(column.name);
            }
        }
    }
}

/// Column lists for every entity a schema declares
#[derive(Debug, Clone, Default)]
pub struct ColumnModel {
    /// Entity names in first-declared order
    order: Vec<String>,
    tables: HashMap<String, EntityColumns>,
}

impl ColumnModel {
    pub fn build(entries: &[SchemaEntry]) -> Self {
        let mut model = ColumnModel::default();
        for entry in entries {
            // top-level plain fields land in a list nobody reads
            let mut scratch = Vec::new();
            model.collect(&entry.spec, &mut scratch, None);
        }
        model
    }

    fn collect(&mut self, spec: &FieldSpec, target: &mut Vec<Column>, parent: Option<&str>) {
        match spec {
            FieldSpec::Plain(column) => target.push(column.clone()),
            FieldSpec::Option(field) => target.push(Column::new(field.column.clone())),
            FieldSpec::Entity(def) => {
                if !self.order.contains(&def.name) {
                    self.order.push(def.name.clone());
                }

                let mut own = Vec::new();
                if def.primary_key.is_some() || parent.is_some() {
                    own.push(Column::new("id"));
                }
                if let Some(parent) = parent {
                    own.push(Column::new(format!("{parent}_id")));
                }
                if let Some(filename_field) = &def.filename_field {
                    own.push(Column::new(filename_field.clone()));
                }
                for field in &def.fields {
                    self.collect(&field.spec, &mut own, Some(&def.name));
                }

                self.tables.entry(def.name.clone()).or_default().merge(own);
            }
            FieldSpec::Fanout(members) => {
                for member in members {
                    self.collect(member, target, parent);
                }
            }
        }
    }

    pub fn entities(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, entity: &str) -> Option<&EntityColumns> {
        self.tables.get(entity)
    }

    /// Column names for an entity, empty for unknown entities
    pub fn column_order(&self, entity: &str) -> &[String] {
        self.tables
            .get(entity)
            .map(|t| t.columns.as_slice())
            .unwrap_or(&[])
    }
}
