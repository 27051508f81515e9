//! Schema compilation
//!
//! A schema is loaded once per run, validated up front and turned into a
//! [`CompiledSchema`]: the typed field tree plus the column order of every
//! entity it declares. Nothing is re-checked per document.

pub mod columns;
pub mod field;

pub use columns::{ColumnModel, EntityColumns};
pub use field::{Column, EntityDef, FieldEntry, FieldSpec, OptionBehavior, OptionField};

use crate::error::SchemaError;
use log::warn;
use serde_yaml::Value;
use std::path::Path;

/// One top-level schema entry
///
/// Top-level entries are applied to the document's root element directly, so
/// `label` is never evaluated as a path.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub label: String,
    pub spec: FieldSpec,
}

/// A validated schema with precomputed column order
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    entries: Vec<SchemaEntry>,
    columns: ColumnModel,
}

impl CompiledSchema {
    /// Read and compile a YAML schema file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let raw: Value = serde_yaml::from_str(yaml)?;
        Self::compile(&raw)
    }

    /// Compile a schema that has already been parsed into YAML values
    pub fn compile(raw: &Value) -> Result<Self, SchemaError> {
        let Value::Mapping(top) = raw else {
            return Err(field::invalid(
                "<schema>",
                "a schema must be a mapping of paths to field specs",
                raw,
            ));
        };

        let mut entries = Vec::with_capacity(top.len());
        for (key, value) in top {
            let label = key
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| field::invalid("<schema>", "top-level keys must be strings", key))?;
            let spec = FieldSpec::parse(&label, value)?;
            check_top_level(&label, &spec, value)?;
            entries.push(SchemaEntry { label, spec });
        }

        let columns = ColumnModel::build(&entries);
        Ok(CompiledSchema { entries, columns })
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn columns(&self) -> &ColumnModel {
        &self.columns
    }

    /// Ordered column names of an entity's table
    pub fn column_order(&self, entity: &str) -> &[String] {
        self.columns.column_order(entity)
    }
}

/// Root-level rules that cannot be expressed in the field grammar itself
fn check_top_level(label: &str, spec: &FieldSpec, value: &Value) -> Result<(), SchemaError> {
    match spec {
        FieldSpec::Plain(Column { name, .. }) | FieldSpec::Option(OptionField { column: name, .. }) => {
            warn!(
                "Top-level field \"{label}\" maps to column \"{name}\" outside any entity; \
                 its value is never written"
            );
            Ok(())
        }
        FieldSpec::Entity(def) if def.primary_key.is_none() => {
            if def.has_nested_entities() {
                return Err(field::invalid(
                    label,
                    &format!(
                        "root entity \"{}\" declares nested entities but no <primary_key>; \
                         its children could not be linked to it",
                        def.name
                    ),
                    value,
                ));
            }
            warn!(
                "Root entity \"{}\" has no <primary_key>; its records carry no id",
                def.name
            );
            Ok(())
        }
        FieldSpec::Entity(_) => Ok(()),
        FieldSpec::Fanout(members) => members
            .iter()
            .try_for_each(|member| check_top_level(label, member, value)),
    }
}
