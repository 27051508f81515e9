//! The field grammar of a tabulation schema
//!
//! A schema maps paths to field specs. In YAML a field spec is one of:
//!
//! ```yaml
//! ./title: title                       # plain column
//! ./filed: filed:DATE                  # plain column with an SQL type hint
//! ./keyword:                           # column with options
//!   <fieldname>: keywords
//!   <joiner>: "; "
//! ./inventor:                          # nested entity
//!   <entity>: inventor
//!   <primary_key>: ./id
//!   <filename_field>: source_file
//!   <fields>:
//!     ./name: name
//! ./abstract:                          # several specs over the same nodes
//!   - abstract
//!   - <entity>: abstract_paragraph
//!     <fields>: {"./p": text}
//! ```

use crate::error::SchemaError;
use crate::path::XPath;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

const ENTITY: &str = "<entity>";
const PRIMARY_KEY: &str = "<primary_key>";
const FILENAME_FIELD: &str = "<filename_field>";
const FIELDS: &str = "<fields>";
const FIELDNAME: &str = "<fieldname>";
const JOINER: &str = "<joiner>";
const ENUM_MAP: &str = "<enum_map>";
const ENUM_TYPE: &str = "<enum_type>";

/// How a matched node set maps onto output columns
#[derive(Debug, Clone)]
pub enum FieldSpec {
    /// Single node text into one column
    Plain(Column),
    /// Column with a joiner, enum map or enum literal
    Option(OptionField),
    /// Each matched element becomes a record in another table
    Entity(EntityDef),
    /// Several specs applied to the same matched nodes
    Fanout(Vec<FieldSpec>),
}

/// An output column, optionally carrying an SQL type hint (`name:TYPE`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            sql_type: None,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((name, sql_type)) if !sql_type.trim().is_empty() => Column {
                name: name.trim().to_string(),
                sql_type: Some(sql_type.trim().to_string()),
            },
            _ => Column::new(raw.trim().trim_end_matches(':')),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptionField {
    pub column: String,
    pub behavior: OptionBehavior,
}

/// Only one behavior applies; precedence is joiner, enum map, enum type
#[derive(Debug, Clone, PartialEq)]
pub enum OptionBehavior {
    Join(String),
    EnumMap(HashMap<String, Option<String>>),
    EnumType(String),
    Single,
}

#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub primary_key: Option<XPath>,
    pub filename_field: Option<String>,
    pub fields: Vec<FieldEntry>,
}

impl EntityDef {
    /// Whether any field, looking through fanouts, declares another entity
    pub fn has_nested_entities(&self) -> bool {
        fn declares_entity(spec: &FieldSpec) -> bool {
            match spec {
                FieldSpec::Entity(_) => true,
                FieldSpec::Fanout(members) => members.iter().any(declares_entity),
                FieldSpec::Plain(_) | FieldSpec::Option(_) => false,
            }
        }
        self.fields.iter().any(|f| declares_entity(&f.spec))
    }
}

/// A path and the spec applied to whatever it selects
#[derive(Debug, Clone)]
pub struct FieldEntry {
    pub path: XPath,
    pub spec: FieldSpec,
}

impl FieldSpec {
    /// Parse one schema node. `location` names the enclosing key for error messages.
    pub fn parse(location: &str, value: &Value) -> Result<Self, SchemaError> {
        match value {
            Value::String(raw) => {
                let column = Column::parse(raw);
                if column.name.is_empty() {
                    return Err(invalid(location, "empty column name", value));
                }
                Ok(FieldSpec::Plain(column))
            }
            Value::Sequence(items) => {
                if items.is_empty() {
                    return Err(invalid(location, "empty list of field specs", value));
                }
                let members = items
                    .iter()
                    .map(|item| FieldSpec::parse(location, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FieldSpec::Fanout(members))
            }
            Value::Mapping(map) if map.contains_key(ENTITY) => {
                parse_entity(location, map, value).map(FieldSpec::Entity)
            }
            Value::Mapping(map) if map.contains_key(FIELDNAME) => {
                parse_option(location, map, value).map(FieldSpec::Option)
            }
            _ => Err(invalid(
                location,
                "expected a column name, an entity or field definition, or a list",
                value,
            )),
        }
    }
}

fn parse_entity(location: &str, map: &Mapping, value: &Value) -> Result<EntityDef, SchemaError> {
    check_keys(location, map, &[ENTITY, PRIMARY_KEY, FILENAME_FIELD, FIELDS], value)?;

    let name = required_string(location, map, ENTITY, value)?;
    let primary_key = optional_string(location, map, PRIMARY_KEY, value)?
        .map(|pk| XPath::parse(&pk))
        .transpose()?;
    let filename_field = optional_string(location, map, FILENAME_FIELD, value)?;

    let fields = match map.get(FIELDS) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Mapping(fields)) => parse_fields(&name, fields)?,
        Some(_) => return Err(invalid(location, "<fields> must be a mapping", value)),
    };

    Ok(EntityDef {
        name,
        primary_key,
        filename_field,
        fields,
    })
}

/// Parse an ordered `path: spec` mapping
pub(crate) fn parse_fields(location: &str, fields: &Mapping) -> Result<Vec<FieldEntry>, SchemaError> {
    fields
        .iter()
        .map(|(key, spec)| {
            let path = scalar_string(key).ok_or_else(|| {
                invalid(location, "field paths must be strings", key)
            })?;
            let nested_location = format!("{location}/{path}");
            Ok(FieldEntry {
                path: XPath::parse(&path)?,
                spec: FieldSpec::parse(&nested_location, spec)?,
            })
        })
        .collect()
}

fn parse_option(location: &str, map: &Mapping, value: &Value) -> Result<OptionField, SchemaError> {
    check_keys(location, map, &[FIELDNAME, JOINER, ENUM_MAP, ENUM_TYPE], value)?;

    let column = required_string(location, map, FIELDNAME, value)?;

    let behavior = if let Some(joiner) = optional_string(location, map, JOINER, value)? {
        OptionBehavior::Join(joiner)
    } else if let Some(enum_map) = map.get(ENUM_MAP) {
        let Value::Mapping(entries) = enum_map else {
            return Err(invalid(location, "<enum_map> must be a mapping", value));
        };
        let mut lookup = HashMap::with_capacity(entries.len());
        for (k, v) in entries {
            let key = scalar_string(k)
                .ok_or_else(|| invalid(location, "<enum_map> keys must be scalars", value))?;
            let mapped = match v {
                Value::Null => None,
                other => Some(scalar_string(other).ok_or_else(|| {
                    invalid(location, "<enum_map> values must be scalars", value)
                })?),
            };
            lookup.insert(key, mapped);
        }
        OptionBehavior::EnumMap(lookup)
    } else if let Some(literal) = optional_string(location, map, ENUM_TYPE, value)? {
        OptionBehavior::EnumType(literal)
    } else {
        OptionBehavior::Single
    };

    Ok(OptionField { column, behavior })
}

fn check_keys(location: &str, map: &Mapping, allowed: &[&str], value: &Value) -> Result<(), SchemaError> {
    for key in map.keys() {
        let known = key.as_str().is_some_and(|k| allowed.contains(&k));
        if !known {
            let shown = scalar_string(key).unwrap_or_else(|| "?".to_string());
            return Err(invalid(location, &format!("unexpected key `{shown}`"), value));
        }
    }
    Ok(())
}

fn required_string(location: &str, map: &Mapping, key: &str, value: &Value) -> Result<String, SchemaError> {
    optional_string(location, map, key, value)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid(location, &format!("{key} must be a non-empty string"), value))
}

fn optional_string(location: &str, map: &Mapping, key: &str, value: &Value) -> Result<Option<String>, SchemaError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => scalar_string(v)
            .map(Some)
            .ok_or_else(|| invalid(location, &format!("{key} must be a scalar"), value)),
    }
}

/// Render a YAML scalar as text
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn invalid(location: &str, reason: &str, value: &Value) -> SchemaError {
    let rendered = serde_yaml::to_string(value).unwrap_or_default();
    SchemaError::InvalidSpec {
        location: location.to_string(),
        reason: reason.to_string(),
        spec: rendered.trim_end().replace('\n', "\n "),
    }
}
