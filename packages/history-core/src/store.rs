//! Append-only history log scoped to one unit of work.
//!
//! Reads go to the committed log; appends and retirements are staged here and
//! handed to the transaction on commit. Parent links are always computed
//! against the committed log, so a record never chains to a sibling staged in
//! the same batch.

use std::collections::HashSet;
use std::fmt;

use crate::error::Result;
use crate::model::{ChangeKind, EntityRef, HistoryRecord};

/// Read access to committed history records.
pub trait HistoryLog {
    /// Committed records of one row, ordered by id.
    fn chain(&self, table: &str, row_id: &str) -> Result<Vec<HistoryRecord>>;

    /// Committed record with the greatest id for the row.
    fn latest(&self, table: &str, row_id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self.chain(table, row_id)?.pop())
    }

    /// Committed record with the given id, if it belongs to the row.
    fn by_id(&self, table: &str, row_id: &str, id: i64) -> Result<Option<HistoryRecord>> {
        Ok(self
            .chain(table, row_id)?
            .into_iter()
            .find(|record| record.id == id))
    }
}

/// History operation staged for the next commit.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOp {
    /// Append a new record; `origin` is the Added entity whose key backfills the row id
    Append {
        record: HistoryRecord,
        origin: Option<EntityRef>,
    },
    /// Remove a committed record
    Retire { id: i64 },
    /// Point a committed record at a new parent
    Relink { id: i64, parent_id: Option<i64> },
}

/// History log view for one unit of work.
pub struct HistoryStore<'a> {
    log: &'a dyn HistoryLog,
    staged: Vec<HistoryOp>,
    retired: HashSet<i64>,
}

impl<'a> HistoryStore<'a> {
    /// Creates a store over the committed log.
    pub fn new(log: &'a dyn HistoryLog) -> Self {
        Self {
            log,
            staged: Vec::new(),
            retired: HashSet::new(),
        }
    }

    /// Stages a record for append, linking Modified and Deleted records to
    /// the latest committed record of the same row.
    ///
    /// A record already staged for the same row and entity is replaced, so a
    /// unit of work commits at most one record per row.
    pub fn append(&mut self, mut record: HistoryRecord, origin: Option<EntityRef>) -> Result<()> {
        if record.kind != ChangeKind::Added {
            let row_id = record.row_id.clone();
            self.link_parent(&mut record, &row_id)?;
        }

        tracing::debug!(
            table = %record.table_name,
            row_id = %record.row_id,
            kind = %record.kind,
            parent_id = ?record.parent_id,
            "staged history record"
        );
        let existing = self.staged.iter_mut().find(|op| match op {
            HistoryOp::Append {
                record: staged,
                origin: staged_origin,
            } => {
                *staged_origin == origin
                    && staged.table_name == record.table_name
                    && staged.row_id == record.row_id
                    && staged.entity_name == record.entity_name
            }
            _ => false,
        });
        match existing {
            Some(op) => *op = HistoryOp::Append { record, origin },
            None => self.staged.push(HistoryOp::Append { record, origin }),
        }
        Ok(())
    }

    /// Sets `record.parent_id` to the latest committed record of `row_id`.
    pub fn link_parent(&self, record: &mut HistoryRecord, row_id: &str) -> Result<()> {
        record.parent_id = self.latest(&record.table_name, row_id)?.map(|parent| parent.id);
        Ok(())
    }

    /// Latest committed record of the row, ignoring records retired in this unit of work.
    pub fn latest(&self, table: &str, row_id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self.chain(table, row_id)?.pop())
    }

    /// Committed record of the row with the given id, unless retired in this unit of work.
    pub fn by_id(&self, table: &str, row_id: &str, id: i64) -> Result<Option<HistoryRecord>> {
        if self.retired.contains(&id) {
            return Ok(None);
        }
        self.log.by_id(table, row_id, id)
    }

    /// Committed chain of the row, ignoring records retired in this unit of work.
    pub fn chain(&self, table: &str, row_id: &str) -> Result<Vec<HistoryRecord>> {
        let mut chain = self.log.chain(table, row_id)?;
        chain.retain(|record| !self.retired.contains(&record.id));
        Ok(chain)
    }

    /// Stages removal of a committed record.
    ///
    /// The record's child, committed or staged, is relinked to the record's
    /// own parent so the row's chain stays contiguous.
    pub fn retire(&mut self, record: &HistoryRecord) -> Result<()> {
        let chain = self.chain(&record.table_name, &record.row_id)?;
        if let Some(child) = chain.iter().find(|r| r.parent_id == Some(record.id)) {
            self.staged.push(HistoryOp::Relink {
                id: child.id,
                parent_id: record.parent_id,
            });
        }

        for op in &mut self.staged {
            if let HistoryOp::Append { record: staged, .. } = op {
                if staged.parent_id == Some(record.id) {
                    staged.parent_id = record.parent_id;
                }
            }
        }

        self.retired.insert(record.id);
        self.staged.push(HistoryOp::Retire { id: record.id });
        tracing::debug!(
            table = %record.table_name,
            row_id = %record.row_id,
            id = record.id,
            "staged history retirement"
        );
        Ok(())
    }

    /// Operations staged so far.
    pub fn staged(&self) -> &[HistoryOp] {
        &self.staged
    }

    /// Number of staged appends.
    pub fn staged_appends(&self) -> usize {
        self.staged
            .iter()
            .filter(|op| matches!(op, HistoryOp::Append { .. }))
            .count()
    }

    /// Takes the staged operations, leaving the store empty.
    pub fn take_staged(&mut self) -> Vec<HistoryOp> {
        self.retired.clear();
        std::mem::take(&mut self.staged)
    }

    /// Discards staged operations.
    pub fn discard(&mut self) {
        self.retired.clear();
        self.staged.clear();
    }
}

/// Broken parent link found by [`verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainViolation {
    pub record_id: i64,
    pub expected_parent: Option<i64>,
    pub actual_parent: Option<i64>,
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record {} links to {:?}, expected {:?}",
            self.record_id, self.actual_parent, self.expected_parent
        )
    }
}

/// Checks that each record of a row chain links to its predecessor.
///
/// The first record must have no parent; record `k` must link to record `k-1`.
pub fn verify_chain(chain: &[HistoryRecord]) -> Vec<ChainViolation> {
    let mut ordered: Vec<&HistoryRecord> = chain.iter().collect();
    ordered.sort_by_key(|record| record.id);

    let mut expected_parent = None;
    let mut violations = Vec::new();
    for record in ordered {
        if record.parent_id != expected_parent {
            violations.push(ChainViolation {
                record_id: record.id,
                expected_parent,
                actual_parent: record.parent_id,
            });
        }
        expected_parent = Some(record.id);
    }
    violations
}
