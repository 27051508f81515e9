use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Primary key of a record, natural or synthesized
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey(pub String);

impl RecordKey {
    pub fn new(id: impl Into<String>) -> Self {
        RecordKey(id.into())
    }

    /// The `n`-th synthetic key issued under a parent: `{parent}_{n}`
    pub fn synthetic(parent: &RecordKey, n: u64) -> Self {
        RecordKey(format!("{}_{}", parent.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of an output table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// The entity (table) this row belongs to
    pub entity_type: String,

    /// Column values. Absent columns are simply missing.
    pub data: Map<String, Value>,

    pub id: Option<RecordKey>,

    /// Parent record, for nested entities
    pub parent: Option<ParentRef>,
}

/// Reference to a parent record (for foreign keys)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub entity_type: String,
    pub id: RecordKey,
}

impl ParentRef {
    /// Name of the foreign key column children carry: `{parent}_id`
    pub fn column(&self) -> String {
        format!("{}_id", self.entity_type)
    }
}

impl Record {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Record {
            entity_type: entity_type.into(),
            data: Map::new(),
            id: None,
            parent: None,
        }
    }

    /// Throwaway record used while walking a document's top-level entries
    pub(crate) fn scratch() -> Self {
        Record::new(String::new())
    }

    pub(crate) fn is_scratch(&self) -> bool {
        self.entity_type.is_empty()
    }

    pub fn with_id(mut self, id: RecordKey) -> Self {
        self.data
            .insert("id".to_string(), Value::String(id.0.clone()));
        self.id = Some(id);
        self
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.data
            .insert(parent.column(), Value::String(parent.id.0.clone()));
        self.parent = Some(parent);
        self
    }

    /// Set a column; `None` stores an explicit null
    pub fn set(&mut self, column: &str, value: Option<String>) {
        let value = value.map(Value::String).unwrap_or(Value::Null);
        self.data.insert(column.to_string(), value);
    }

    /// Text of a column, `None` when absent or null
    pub fn get(&self, column: &str) -> Option<&str> {
        self.data.get(column).and_then(Value::as_str)
    }

    /// How children of this record refer to it, if it has a key
    pub fn as_parent(&self) -> Option<ParentRef> {
        if self.is_scratch() {
            return None;
        }
        self.id.as_ref().map(|id| ParentRef {
            entity_type: self.entity_type.clone(),
            id: id.clone(),
        })
    }
}

/// All records of one entity collected since the last flush
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub entity: String,
    pub records: Vec<Record>,
}
