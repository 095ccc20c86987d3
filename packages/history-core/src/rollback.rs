//! Rollback of a row to the state captured by one of its history records.
//!
//! A rollback runs validate → locate → reconstruct → detach/reattach → retire.
//! Precondition failures are returned before anything is staged. Type and
//! payload failures skip the rollback for that record and leave both the
//! entity and the log untouched. A record is retired only after its restored
//! state has been staged.

use std::sync::Arc;

use crate::catalog::{EntityCatalog, EntityType};
use crate::error::{HistoryError, Result};
use crate::model::{ChangeKind, EntityRef, EntityState, HistoryRecord};
use crate::store::HistoryStore;
use crate::value::Snapshot;

/// Unit-of-work operations needed to re-apply a restored state.
pub trait EntityStaging {
    /// Stops tracking the live instance.
    fn detach(&mut self, entity: EntityRef) -> Result<()>;

    /// Tracks `values` as a pending Modified mutation.
    ///
    /// `persisted` holds the stored row, or `None` when the row no longer exists.
    fn reattach_modified(
        &mut self,
        entity_type: Arc<EntityType>,
        persisted: Option<Snapshot>,
        values: Snapshot,
    ) -> Result<EntityRef>;
}

/// Live tracked instance of the row being rolled back.
#[derive(Debug, Clone)]
pub struct LiveEntity {
    pub entity: EntityRef,
    pub state: EntityState,
    /// Stored values of the tracked instance
    pub values: Snapshot,
}

/// Row selected for rollback.
#[derive(Debug, Clone)]
pub struct RollbackTarget {
    /// Entity type of the row
    pub entity_name: String,
    /// Row id built from the key values
    pub row_id: String,
    /// Tracked instance, if the unit of work holds one
    pub live: Option<LiveEntity>,
    /// Persisted row, if it exists
    pub persisted: Option<Snapshot>,
}

/// Result of one rollback request.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// Nothing to roll back to
    NoChange,
    /// Restored state staged and record retired
    Restored { history_id: i64, entity: EntityRef },
    /// Record could not be applied; entity and log left unchanged
    Skipped { history_id: i64, error: HistoryError },
}

/// Resolves and stages rollbacks.
pub struct RollbackResolver<'a> {
    catalog: &'a EntityCatalog,
}

impl<'a> RollbackResolver<'a> {
    /// Creates a resolver over the given catalog.
    pub fn new(catalog: &'a EntityCatalog) -> Self {
        Self { catalog }
    }

    /// Rolls the target row back to the `before` state of a history record.
    ///
    /// With `history_id` the given record is used; otherwise the latest record
    /// of the row, provided the chain holds more than one record.
    pub fn rollback(
        &self,
        target: &RollbackTarget,
        history_id: Option<i64>,
        store: &mut HistoryStore<'_>,
        staging: &mut dyn EntityStaging,
    ) -> Result<RollbackOutcome> {
        let entity_type = self.validate(target)?;

        let record = match self.locate(&entity_type, target, history_id, store)? {
            Some(record) => record,
            None => {
                tracing::debug!(
                    entity = %target.entity_name,
                    row_id = %target.row_id,
                    "no history record to roll back to"
                );
                return Ok(RollbackOutcome::NoChange);
            }
        };

        if record.kind == ChangeKind::Added {
            return Err(HistoryError::Precondition {
                entity: target.entity_name.clone(),
                reason: format!("history record {} captured an insert", record.id),
            });
        }

        let (record_type, values) = match self.reconstruct(&record, target) {
            Ok(reconstructed) => reconstructed,
            Err(error) if error.is_recoverable() => {
                tracing::warn!(
                    history_id = record.id,
                    entity = %record.entity_name,
                    error = %error,
                    "skipping rollback"
                );
                return Ok(RollbackOutcome::Skipped {
                    history_id: record.id,
                    error,
                });
            }
            Err(error) => return Err(error),
        };

        if let Some(live) = &target.live {
            staging.detach(live.entity)?;
        }
        let entity = staging.reattach_modified(record_type, target.persisted.clone(), values)?;
        store.retire(&record)?;

        tracing::info!(
            history_id = record.id,
            table = %record.table_name,
            row_id = %record.row_id,
            kind = %record.kind,
            "rollback staged"
        );
        Ok(RollbackOutcome::Restored {
            history_id: record.id,
            entity,
        })
    }

    fn validate(&self, target: &RollbackTarget) -> Result<Arc<EntityType>> {
        let entity_type = self
            .catalog
            .get(&target.entity_name)
            .ok_or_else(|| HistoryError::Precondition {
                entity: target.entity_name.clone(),
                reason: "entity type is not registered".to_string(),
            })?;

        if let Some(live) = &target.live {
            if live.state == EntityState::Added {
                return Err(HistoryError::Precondition {
                    entity: target.entity_name.clone(),
                    reason: "entity is newly added".to_string(),
                });
            }
        }

        // Without live or stored values the row id is all there is to go on
        let resolvable = match target
            .live
            .as_ref()
            .map(|live| &live.values)
            .or(target.persisted.as_ref())
        {
            Some(values) => entity_type.has_resolvable_key(values),
            None => !target.row_id.is_empty(),
        };
        if !resolvable {
            return Err(HistoryError::Precondition {
                entity: target.entity_name.clone(),
                reason: "entity has no resolvable primary key".to_string(),
            });
        }

        Ok(entity_type)
    }

    fn locate(
        &self,
        entity_type: &EntityType,
        target: &RollbackTarget,
        history_id: Option<i64>,
        store: &HistoryStore<'_>,
    ) -> Result<Option<HistoryRecord>> {
        match history_id {
            Some(id) => store.by_id(&entity_type.table, &target.row_id, id),
            None => {
                let mut chain = store.chain(&entity_type.table, &target.row_id)?;
                if chain.len() <= 1 {
                    return Ok(None);
                }
                Ok(chain.pop())
            }
        }
    }

    fn reconstruct(
        &self,
        record: &HistoryRecord,
        target: &RollbackTarget,
    ) -> Result<(Arc<EntityType>, Snapshot)> {
        let record_type = self.catalog.resolve(&record.entity_name)?;
        let before = record.before()?.ok_or_else(|| HistoryError::MalformedPayload {
            history_id: record.id,
            reason: "record has no before snapshot".to_string(),
        })?;

        // A Deleted record's before map carries the key values
        let mut values = match &target.persisted {
            Some(row) => row.clone(),
            None if record_type.has_resolvable_key(&before) => Snapshot::new(),
            None => record_type
                .parse_row_id(&target.row_id)
                .map_err(|e| HistoryError::MalformedPayload {
                    history_id: record.id,
                    reason: e.to_string(),
                })?,
        };
        values.merge(&before);

        let values = record_type
            .conform(&values)
            .map_err(|reason| HistoryError::MalformedPayload {
                history_id: record.id,
                reason,
            })?;

        if record_type.row_id(&values) != target.row_id {
            return Err(HistoryError::MalformedPayload {
                history_id: record.id,
                reason: format!(
                    "restored key '{}' does not match row '{}'",
                    record_type.row_id(&values),
                    target.row_id
                ),
            });
        }

        Ok((record_type, values))
    }
}
