//! Row tables and the history table of the in-memory engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::EntityType;
use crate::error::{HistoryError, Result};
use crate::model::HistoryRecord;
use crate::value::{Snapshot, Value};

/// Rows of one entity type, keyed by row id.
#[derive(Debug, Clone)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Entity type stored in the table
    pub entity: Arc<EntityType>,
    /// Rows keyed by row id
    pub(crate) rows: BTreeMap<String, Snapshot>,
    /// Next value handed out for an auto-increment key
    pub(crate) next_id: i64,
}

impl Table {
    /// Creates an empty table for the entity type.
    pub fn new(entity: Arc<EntityType>) -> Self {
        Self {
            name: entity.table.clone(),
            entity,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Returns the row with the given id.
    pub fn get(&self, row_id: &str) -> Option<&Snapshot> {
        self.rows.get(row_id)
    }

    /// Iterates rows in row id order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &Snapshot)> {
        self.rows.iter().map(|(id, row)| (id.as_str(), row))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Next auto-increment key value.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Inserts a new row, assigning the identity key when it is null.
    ///
    /// # Returns
    /// The row id of the inserted row.
    pub fn insert(&mut self, mut values: Snapshot) -> Result<String> {
        if let Some(identity) = self.entity.identity_key() {
            match values.get(&identity.name).and_then(Value::as_int) {
                Some(explicit) => self.next_id = self.next_id.max(explicit + 1),
                None => {
                    values.insert(identity.name.clone(), Value::Int(self.next_id));
                    self.next_id += 1;
                }
            }
        }

        if !self.entity.has_resolvable_key(&values) {
            return Err(HistoryError::MissingKey {
                entity: self.entity.name.clone(),
            });
        }

        let row_id = self.entity.row_id(&values);
        if self.rows.contains_key(&row_id) {
            return Err(HistoryError::DuplicateKey {
                table: self.name.clone(),
                row_id,
            });
        }
        self.rows.insert(row_id.clone(), values);
        Ok(row_id)
    }

    /// Replaces an existing row.
    pub fn update(&mut self, row_id: &str, values: Snapshot) -> Result<()> {
        let row = self
            .rows
            .get_mut(row_id)
            .ok_or_else(|| HistoryError::RecordNotFound {
                table: self.name.clone(),
                row_id: row_id.to_string(),
            })?;
        *row = values;
        Ok(())
    }

    /// Removes an existing row.
    pub fn delete(&mut self, row_id: &str) -> Result<Snapshot> {
        self.rows
            .remove(row_id)
            .ok_or_else(|| HistoryError::RecordNotFound {
                table: self.name.clone(),
                row_id: row_id.to_string(),
            })
    }

    /// Restores persisted rows and the key counter.
    pub(crate) fn restore(&mut self, rows: BTreeMap<String, Snapshot>, next_id: i64) {
        self.rows = rows;
        self.next_id = next_id;
    }
}

/// Committed history records, keyed by id.
#[derive(Debug, Clone)]
pub struct HistoryTable {
    pub(crate) records: BTreeMap<i64, HistoryRecord>,
    pub(crate) next_id: i64,
}

impl HistoryTable {
    /// Creates an empty history table; ids start at 1.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Returns the record with the given id.
    pub fn get(&self, id: i64) -> Option<&HistoryRecord> {
        self.records.get(&id)
    }

    /// Records of one row, ordered by id.
    pub fn chain(&self, table: &str, row_id: &str) -> Vec<HistoryRecord> {
        self.records
            .values()
            .filter(|r| r.table_name == table && r.row_id == row_id)
            .cloned()
            .collect()
    }

    /// Iterates all records in id order.
    pub fn records(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next id to be assigned.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Assigns the next id and stores the record.
    pub(crate) fn append(&mut self, mut record: HistoryRecord) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        record.id = id;
        self.records.insert(id, record);
        id
    }

    /// Removes a record.
    pub(crate) fn retire(&mut self, id: i64) -> Result<HistoryRecord> {
        self.records.remove(&id).ok_or_else(|| {
            HistoryError::TransactionConflict(format!("history record {} no longer exists", id))
        })
    }

    /// Re-points a record's parent link; returns `false` if the record is gone.
    pub(crate) fn relink(&mut self, id: i64, parent_id: Option<i64>) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.parent_id = parent_id;
                true
            }
            None => false,
        }
    }

    /// Restores persisted records and the id counter.
    pub(crate) fn restore(&mut self, records: Vec<HistoryRecord>, next_id: i64) {
        self.records = records.into_iter().map(|r| (r.id, r)).collect();
        let max_id = self.records.keys().next_back().copied().unwrap_or(0);
        self.next_id = next_id.max(max_id + 1);
    }
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new()
    }
}
