//! Per-file table buffers and synthetic key counters
//!
//! The accumulator is owned by the runner and passed by `&mut` into the
//! extractor. Flushing drains every table and resets the key counters, which
//! marks the boundary between two source files.
//!
//! Extraction of one document is staged: [`TableAccumulator::begin_document`]
//! records a checkpoint, and a failed document is rolled back so that neither
//! its rows nor its key counter increments survive.

use crate::extract::types::{Record, RecordKey, Table};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Checkpoint {
    /// Row count of every table that existed at the checkpoint
    table_lens: Vec<usize>,
    /// Counter values before their first change in this document
    counters: Vec<((String, String), Option<u64>)>,
}

#[derive(Debug, Default)]
pub struct TableAccumulator {
    /// Tables in first-append order
    tables: Vec<Table>,
    index: HashMap<String, usize>,
    /// entity -> parent key -> next synthetic ordinal
    key_counters: HashMap<String, HashMap<String, u64>>,
    checkpoint: Option<Checkpoint>,
}

impl TableAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: Record) {
        let idx = match self.index.get(&record.entity_type) {
            Some(&idx) => idx,
            None => {
                self.tables.push(Table {
                    entity: record.entity_type.clone(),
                    records: Vec::new(),
                });
                self.index
                    .insert(record.entity_type.clone(), self.tables.len() - 1);
                self.tables.len() - 1
            }
        };
        self.tables[idx].records.push(record);
    }

    /// Issue the next `{parent}_{n}` key for an entity without a natural key
    pub fn next_synthetic_key(&mut self, entity: &str, parent: &RecordKey) -> RecordKey {
        let counter = self
            .key_counters
            .entry(entity.to_string())
            .or_default()
            .entry(parent.0.clone())
            .or_insert(0);
        let n = *counter;
        *counter += 1;

        if let Some(checkpoint) = &mut self.checkpoint {
            let slot = (entity.to_string(), parent.0.clone());
            if !checkpoint.counters.iter().any(|(k, _)| *k == slot) {
                let previous = if n == 0 { None } else { Some(n) };
                checkpoint.counters.push((slot, previous));
            }
        }

        RecordKey::synthetic(parent, n)
    }

    pub fn begin_document(&mut self) {
        self.checkpoint = Some(Checkpoint {
            table_lens: self.tables.iter().map(|t| t.records.len()).collect(),
            counters: Vec::new(),
        });
    }

    pub fn commit_document(&mut self) {
        self.checkpoint = None;
    }

    /// Undo every append and key issued since [`Self::begin_document`]
    pub fn rollback_document(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };

        for table in self.tables.drain(checkpoint.table_lens.len()..) {
            self.index.remove(&table.entity);
        }
        for (table, len) in self.tables.iter_mut().zip(&checkpoint.table_lens) {
            table.records.truncate(*len);
        }

        for ((entity, parent), previous) in checkpoint.counters {
            let Some(per_parent) = self.key_counters.get_mut(&entity) else {
                continue;
            };
            match previous {
                Some(value) => {
                    per_parent.insert(parent, value);
                }
                None => {
                    per_parent.remove(&parent);
                }
            }
        }
    }

    /// Drain all tables and reset key counters
    pub fn flush(&mut self) -> Vec<Table> {
        self.index.clear();
        self.checkpoint = None;
        self.reset_key_counters();
        std::mem::take(&mut self.tables)
    }

    pub fn reset_key_counters(&mut self) {
        self.key_counters.clear();
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Buffered records of an entity
    pub fn records(&self, entity: &str) -> &[Record] {
        self.index
            .get(entity)
            .map(|&idx| self.tables[idx].records.as_slice())
            .unwrap_or(&[])
    }

    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}
