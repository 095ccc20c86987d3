//! Database container managing entity tables and the history log.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::catalog::{EntityCatalog, EntityType};
use crate::config::HistoryConfig;
use crate::encoder::StorageValues;
use crate::error::{HistoryError, Result};
use crate::model::{HistoryRecord, PendingChange};
use crate::session::Session;
use crate::store::HistoryLog;
use crate::table::{HistoryTable, Table};
use crate::transaction::{CommitSummary, TransactionHandle};
use crate::value::{Snapshot, Value};

/// Database container holding entity tables, the history log and the catalog.
#[derive(Debug)]
pub struct Database {
    /// Map of table name to table instance
    tables: RwLock<HashMap<String, Table>>,
    /// Committed history records
    history: RwLock<HistoryTable>,
    /// Registered entity types
    catalog: Arc<EntityCatalog>,
    /// Capture, encoding and storage settings
    config: HistoryConfig,
}

impl Database {
    /// Creates a new empty database.
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_catalog(Arc::new(EntityCatalog::new()), config)
    }

    /// Creates a new database over an existing catalog.
    ///
    /// A table is created for every type already registered in the catalog.
    pub fn with_catalog(catalog: Arc<EntityCatalog>, config: HistoryConfig) -> Self {
        let tables = catalog
            .entity_types()
            .into_iter()
            .map(|entity| (entity.table.clone(), Table::new(entity)))
            .collect();
        Self {
            tables: RwLock::new(tables),
            history: RwLock::new(HistoryTable::new()),
            catalog,
            config,
        }
    }

    /// Returns a reference to the entity catalog.
    pub fn catalog(&self) -> &Arc<EntityCatalog> {
        &self.catalog
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Registers an entity type and creates its table.
    ///
    /// # Arguments
    /// * `entity` - Entity type definition
    ///
    /// # Returns
    /// `Result<Arc<EntityType>>` with the registered type.
    pub fn register_entity(&self, entity: EntityType) -> Result<Arc<EntityType>> {
        let mut tables = self.tables.write().map_err(|_| HistoryError::LockPoisoned)?;
        if tables.contains_key(&entity.table) {
            return Err(HistoryError::TableAlreadyExists(entity.table));
        }

        let entity = self.catalog.register(entity)?;
        tables.insert(entity.table.clone(), Table::new(Arc::clone(&entity)));
        tracing::debug!(entity = %entity.name, table = %entity.table, "entity registered");
        Ok(entity)
    }

    /// Returns a copy of a row.
    ///
    /// # Returns
    /// `Ok(None)` if the row does not exist, `Err(TableNotFound)` if the table does not.
    pub fn get_row(&self, table: &str, row_id: &str) -> Result<Option<Snapshot>> {
        let tables = self.tables.read().map_err(|_| HistoryError::LockPoisoned)?;
        let table = tables.get(table).ok_or_else(|| HistoryError::TableNotFound {
            table: table.to_string(),
        })?;
        Ok(table.get(row_id).cloned())
    }

    /// Returns copies of all rows of a table in row id order.
    pub fn rows(&self, table: &str) -> Result<Vec<(String, Snapshot)>> {
        let tables = self.tables.read().map_err(|_| HistoryError::LockPoisoned)?;
        let table = tables.get(table).ok_or_else(|| HistoryError::TableNotFound {
            table: table.to_string(),
        })?;
        Ok(table
            .rows()
            .map(|(id, row)| (id.to_string(), row.clone()))
            .collect())
    }

    /// Returns the number of rows in a table.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read().map_err(|_| HistoryError::LockPoisoned)?;
        tables
            .get(table)
            .map(Table::len)
            .ok_or_else(|| HistoryError::TableNotFound {
                table: table.to_string(),
            })
    }

    /// Returns a sorted list of all table names.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Returns every committed history record in id order.
    pub fn history_records(&self) -> Result<Vec<HistoryRecord>> {
        let history = self.history.read().map_err(|_| HistoryError::LockPoisoned)?;
        Ok(history.records().cloned().collect())
    }

    /// Returns the number of committed history records.
    pub fn history_count(&self) -> Result<usize> {
        let history = self.history.read().map_err(|_| HistoryError::LockPoisoned)?;
        Ok(history.len())
    }

    /// Opens a unit of work over this database.
    pub fn session(&self) -> Session<'_> {
        Session::new(self)
    }

    /// Commits a transaction against all tables and the history log.
    ///
    /// Locks are taken tables first, history second.
    pub fn commit_transaction(&self, tx: &mut TransactionHandle) -> Result<CommitSummary> {
        let mut tables = self.tables.write().map_err(|_| HistoryError::LockPoisoned)?;
        let mut history = self.history.write().map_err(|_| HistoryError::LockPoisoned)?;
        tx.commit_with_tables(&mut tables, &mut history, &self.config)
    }

    /// Clones every table, sorted by name.
    pub(crate) fn tables_snapshot(&self) -> Result<Vec<Table>> {
        let tables = self.tables.read().map_err(|_| HistoryError::LockPoisoned)?;
        let mut snapshot: Vec<Table> = tables.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshot)
    }

    /// Clones the history table.
    pub(crate) fn history_snapshot(&self) -> Result<HistoryTable> {
        let history = self.history.read().map_err(|_| HistoryError::LockPoisoned)?;
        Ok(history.clone())
    }

    /// Replaces the rows of a table with persisted content.
    pub(crate) fn restore_table(
        &self,
        table: &str,
        rows: std::collections::BTreeMap<String, Snapshot>,
        next_id: i64,
    ) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| HistoryError::LockPoisoned)?;
        let table_ref = tables
            .get_mut(table)
            .ok_or_else(|| HistoryError::TableNotFound {
                table: table.to_string(),
            })?;
        table_ref.restore(rows, next_id);
        Ok(())
    }

    /// Replaces the history log with persisted content.
    pub(crate) fn restore_history(&self, records: Vec<HistoryRecord>, next_id: i64) -> Result<()> {
        let mut history = self.history.write().map_err(|_| HistoryError::LockPoisoned)?;
        history.restore(records, next_id);
        Ok(())
    }
}

impl HistoryLog for Database {
    fn chain(&self, table: &str, row_id: &str) -> Result<Vec<HistoryRecord>> {
        let history = self.history.read().map_err(|_| HistoryError::LockPoisoned)?;
        Ok(history.chain(table, row_id))
    }

    fn by_id(&self, table: &str, row_id: &str, id: i64) -> Result<Option<HistoryRecord>> {
        let history = self.history.read().map_err(|_| HistoryError::LockPoisoned)?;
        Ok(history
            .get(id)
            .filter(|r| r.table_name == table && r.row_id == row_id)
            .cloned())
    }
}

impl StorageValues for Database {
    fn persisted_value(&self, change: &PendingChange, property: &str) -> Result<Option<Value>> {
        let row = self.get_row(&change.table_name, &change.row_id())?;
        Ok(row.and_then(|row| row.get(property).cloned()))
    }
}
