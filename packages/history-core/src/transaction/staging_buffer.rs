use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::EntityType;
use crate::error::{HistoryError, Result};
use crate::model::EntityRef;
use crate::table::Table;
use crate::value::Snapshot;

use super::change::Change;

/// Holds staged changes for a single table.
///
/// Changes are isolated from the table until commit.
#[derive(Debug)]
pub struct StagingBuffer {
    /// Name of the table this buffer belongs to
    pub table_name: String,
    /// Entity type of the table
    pub entity: Arc<EntityType>,
    /// Changes in staging order
    pub changes: Vec<Change>,
}

impl StagingBuffer {
    /// Creates an empty staging buffer for the entity type's table.
    pub fn new(entity: Arc<EntityType>) -> Self {
        Self {
            table_name: entity.table.clone(),
            entity,
            changes: Vec::new(),
        }
    }

    /// Stages a row insert.
    pub fn stage_create(&mut self, values: Snapshot, origin: Option<EntityRef>) {
        self.changes.push(Change::Create { values, origin });
    }

    /// Stages a row replacement.
    ///
    /// # Returns
    /// `Err(HistoryError::MissingKey)` when the values carry no usable key.
    pub fn stage_update(&mut self, row_id: String, values: Snapshot) -> Result<()> {
        if row_id.is_empty() {
            return Err(HistoryError::MissingKey {
                entity: self.entity.name.clone(),
            });
        }
        self.changes.push(Change::Update { row_id, values });
        Ok(())
    }

    /// Stages a row delete.
    pub fn stage_delete(&mut self, row_id: String, original: Snapshot) -> Result<()> {
        if row_id.is_empty() {
            return Err(HistoryError::MissingKey {
                entity: self.entity.name.clone(),
            });
        }
        self.changes.push(Change::Delete { row_id, original });
        Ok(())
    }

    /// Applies the staged changes to a working copy of the table.
    ///
    /// Row ids of inserted rows are recorded in `assigned` under their origin.
    ///
    /// # Returns
    /// The number of affected rows.
    pub fn apply(
        &self,
        table: &mut Table,
        assigned: &mut HashMap<EntityRef, String>,
    ) -> Result<usize> {
        for change in &self.changes {
            match change {
                Change::Create { values, origin } => {
                    let row_id = table.insert(values.clone())?;
                    if let Some(origin) = origin {
                        assigned.insert(*origin, row_id);
                    }
                }
                Change::Update { row_id, values } => table.update(row_id, values.clone())?,
                Change::Delete { row_id, original } => {
                    if table.get(row_id).is_some_and(|stored| stored != original) {
                        return Err(HistoryError::TransactionConflict(format!(
                            "row '{}' in table '{}' changed since it was read",
                            row_id, self.table_name
                        )));
                    }
                    table.delete(row_id)?;
                }
            }
        }
        Ok(self.changes.len())
    }

    /// Returns the number of staged changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns whether the buffer has no staged changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
