use std::collections::HashMap;

use crate::config::HistoryConfig;
use crate::error::Result;
use crate::table::{HistoryTable, Table};

use super::transaction::{CommitSummary, Transaction};

/// Unit of work over one [`Transaction`].
///
/// Entity writes and history operations are staged through
/// [`TransactionHandle::transaction_mut`]. A handle that is dropped before a
/// successful commit discards everything it staged.
#[derive(Debug)]
pub struct TransactionHandle {
    transaction: Transaction,
    armed: bool,
}

impl TransactionHandle {
    pub fn new() -> Self {
        Self {
            transaction: Transaction::new(),
            armed: true,
        }
    }

    /// Staging access for entity changes and history operations.
    pub fn transaction_mut(&mut self) -> &mut Transaction {
        &mut self.transaction
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Applies staged entity writes and history operations together.
    ///
    /// A failed commit keeps the handle armed, so dropping it still aborts.
    pub fn commit_with_tables(
        &mut self,
        tables: &mut HashMap<String, Table>,
        history: &mut HistoryTable,
        config: &HistoryConfig,
    ) -> Result<CommitSummary> {
        let summary = self.transaction.commit(tables, history, config)?;
        self.armed = false;
        Ok(summary)
    }

    /// Discards staged work now rather than on drop.
    pub fn abort(mut self) {
        self.armed = false;
        self.transaction.abort();
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        if self.armed && self.transaction.is_active() {
            tracing::debug!(
                tables = self.transaction.staged_table_count(),
                "discarding uncommitted unit of work"
            );
            self.transaction.abort();
        }
    }
}
