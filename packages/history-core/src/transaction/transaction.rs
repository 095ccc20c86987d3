use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::catalog::EntityType;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::model::{ChangeKind, EntityRef, HistoryRecord};
use crate::store::HistoryOp;
use crate::table::{HistoryTable, Table};
use crate::value::Snapshot;

use super::staging_buffer::StagingBuffer;

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    /// Rows written, including history appends and retirements
    pub affected: usize,
    /// Row ids assigned to inserted entities
    pub assigned: HashMap<EntityRef, String>,
    /// Ids of appended history records, in staging order
    pub appended: Vec<i64>,
}

/// Transaction context holding staged row changes and history operations.
///
/// Changes are isolated from the tables until commit.
#[derive(Debug)]
pub struct Transaction {
    /// Map of table name to staging buffer
    staging: HashMap<String, StagingBuffer>,
    /// History operations in staging order
    history: Vec<HistoryOp>,
    /// Whether the transaction has been committed
    committed: AtomicBool,
    /// Whether the transaction has been aborted
    aborted: AtomicBool,
}

impl Transaction {
    /// Creates a new empty transaction.
    pub fn new() -> Self {
        Self {
            staging: HashMap::new(),
            history: Vec::new(),
            committed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_committed() {
            return Err(HistoryError::TransactionConflict(
                "transaction already committed".to_string(),
            ));
        }

        if self.is_aborted() {
            return Err(HistoryError::TransactionConflict(
                "transaction aborted".to_string(),
            ));
        }
        Ok(())
    }

    /// Gets or creates a staging buffer for the entity type's table.
    pub fn get_or_create_staging_buffer(
        &mut self,
        entity: &Arc<EntityType>,
    ) -> Result<&mut StagingBuffer> {
        self.ensure_active()?;
        Ok(self
            .staging
            .entry(entity.table.clone())
            .or_insert_with(|| StagingBuffer::new(Arc::clone(entity))))
    }

    /// Stages a row insert.
    ///
    /// # Arguments
    /// * `entity` - Entity type of the row
    /// * `values` - Property values
    /// * `origin` - Tracked entity that receives the assigned row id
    pub fn stage_create(
        &mut self,
        entity: &Arc<EntityType>,
        values: Snapshot,
        origin: Option<EntityRef>,
    ) -> Result<()> {
        self.get_or_create_staging_buffer(entity)?
            .stage_create(values, origin);
        Ok(())
    }

    /// Stages a row replacement.
    pub fn stage_update(
        &mut self,
        entity: &Arc<EntityType>,
        row_id: String,
        values: Snapshot,
    ) -> Result<()> {
        self.get_or_create_staging_buffer(entity)?
            .stage_update(row_id, values)
    }

    /// Stages a row delete.
    pub fn stage_delete(
        &mut self,
        entity: &Arc<EntityType>,
        row_id: String,
        original: Snapshot,
    ) -> Result<()> {
        self.get_or_create_staging_buffer(entity)?
            .stage_delete(row_id, original)
    }

    /// Stages history operations to run after the row changes.
    pub fn stage_history<I>(&mut self, ops: I) -> Result<()>
    where
        I: IntoIterator<Item = HistoryOp>,
    {
        self.ensure_active()?;
        self.history.extend(ops);
        Ok(())
    }

    /// Commits all staged changes atomically.
    ///
    /// Every change is applied to working copies first; the tables and the
    /// history log are replaced only when all of them succeed.
    ///
    /// # Arguments
    /// * `tables` - Map of table name to Table
    /// * `history` - Committed history log
    /// * `config` - Column limits
    ///
    /// # Returns
    /// `Result<CommitSummary>` with the affected row count and assigned ids.
    pub fn commit(
        &mut self,
        tables: &mut HashMap<String, Table>,
        history: &mut HistoryTable,
        config: &HistoryConfig,
    ) -> Result<CommitSummary> {
        self.ensure_active()?;

        let mut summary = CommitSummary::default();

        // Sort tables by name so commits apply in a stable order
        let mut table_names: Vec<String> = self.staging.keys().cloned().collect();
        table_names.sort();

        let mut working_tables = Vec::with_capacity(table_names.len());
        for table_name in &table_names {
            let staging_buffer = self.staging.get(table_name).ok_or_else(|| {
                HistoryError::DataCorruption(format!(
                    "Staging buffer for table '{}' not found during commit",
                    table_name
                ))
            })?;
            let mut table = tables
                .get(table_name)
                .cloned()
                .ok_or_else(|| HistoryError::TableNotFound {
                    table: table_name.clone(),
                })?;

            summary.affected += staging_buffer.apply(&mut table, &mut summary.assigned)?;
            working_tables.push(table);
        }

        let mut working_history = history.clone();
        for op in &self.history {
            match op {
                HistoryOp::Append { record, origin } => {
                    let mut record = record.clone();
                    if record.kind == ChangeKind::Added {
                        if let Some(row_id) = origin.and_then(|o| summary.assigned.get(&o)) {
                            record.row_id = row_id.clone();
                        }
                    }
                    check_columns(&record, config)?;
                    summary.appended.push(working_history.append(record));
                    summary.affected += 1;
                }
                HistoryOp::Retire { id } => {
                    working_history.retire(*id)?;
                    summary.affected += 1;
                }
                HistoryOp::Relink { id, parent_id } => {
                    if !working_history.relink(*id, *parent_id) {
                        tracing::debug!(id, "relink target no longer exists");
                    }
                }
            }
        }

        for table in working_tables {
            tables.insert(table.name.clone(), table);
        }
        *history = working_history;

        // Mark as committed
        self.committed.store(true, Ordering::Release);
        tracing::info!(
            affected = summary.affected,
            tables = table_names.len(),
            history_appended = summary.appended.len(),
            "transaction committed"
        );
        Ok(summary)
    }

    /// Aborts the transaction, discarding all staged changes.
    pub fn abort(&mut self) {
        if !self.is_committed() && !self.is_aborted() {
            self.aborted.store(true, Ordering::Release);
            self.staging.clear();
            self.history.clear();
        }
    }

    /// Returns whether the transaction has been committed.
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Returns whether the transaction has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns whether the transaction is still active (not committed or aborted).
    pub fn is_active(&self) -> bool {
        !self.is_committed() && !self.is_aborted()
    }

    /// Returns the number of tables with staged changes.
    pub fn staged_table_count(&self) -> usize {
        self.staging.len()
    }

    /// Returns whether any changes have been staged.
    pub fn has_staged_changes(&self) -> bool {
        !self.staging.is_empty() || !self.history.is_empty()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates the storage column limits of a history record.
fn check_columns(record: &HistoryRecord, config: &HistoryConfig) -> Result<()> {
    let mut limits = vec![
        ("table_name", record.table_name.len(), config.table_max_length),
        ("row_id", record.row_id.len(), config.row_id_max_length),
    ];
    if let Some(max) = config.effective_changed_max_length() {
        limits.push(("changed", record.changed.len(), max));
    }

    for (column, length, max) in limits {
        if length > max {
            return Err(HistoryError::ColumnTooLong {
                column,
                length,
                max,
            });
        }
    }
    Ok(())
}
