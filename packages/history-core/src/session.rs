//! Unit of work: change tracking, history capture and rollback over a [`Database`].
//!
//! A session tracks entity instances, reports their pending mutations to the
//! capture pipeline and commits entity writes together with staged history
//! operations in one transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::capture::ChangeCapture;
use crate::catalog::{EntityType, PropertyDef};
use crate::database::Database;
use crate::encoder::DiffEncoder;
use crate::error::{HistoryError, Result};
use crate::model::{Actor, ChangeKind, EntityRef, EntityState, PendingChange, PropertyDelta};
use crate::rollback::{EntityStaging, LiveEntity, RollbackOutcome, RollbackResolver, RollbackTarget};
use crate::store::HistoryStore;
use crate::transaction::TransactionHandle;
use crate::value::{Snapshot, Value};

/// One tracked entity instance.
#[derive(Debug, Clone)]
struct TrackedEntity {
    entity_type: Arc<EntityType>,
    state: EntityState,
    /// Values as last read from or written to storage
    original: Snapshot,
    current: Snapshot,
    /// Properties flagged modified
    modified: BTreeSet<String>,
    /// Whether the row exists in storage
    persisted: bool,
}

impl TrackedEntity {
    /// Row id from the stored key values.
    fn row_id(&self) -> String {
        self.entity_type.row_id(&self.original)
    }

    fn pending_change(&self, entity: EntityRef) -> PendingChange {
        let properties = self
            .entity_type
            .properties
            .iter()
            .map(|p| {
                let current = self.current.get(&p.name).cloned().unwrap_or_default();
                let original = match self.state {
                    EntityState::Added => current.clone(),
                    _ => self.original.get(&p.name).cloned().unwrap_or_default(),
                };
                PropertyDelta {
                    name: p.name.clone(),
                    original_value: original,
                    current_value: current,
                    is_modified: self.modified.contains(&p.name),
                    is_key: p.key,
                    is_foreign_key: self.entity_type.is_foreign_key(&p.name),
                    is_excluded: p.excluded,
                }
            })
            .collect();

        PendingChange {
            entity,
            entity_name: self.entity_type.name.clone(),
            table_name: self.entity_type.table.clone(),
            state: self.state,
            properties,
        }
    }
}

/// Tracked entities of one session, keyed by handle.
#[derive(Debug, Default)]
struct Tracker {
    entities: BTreeMap<EntityRef, TrackedEntity>,
    next_handle: u64,
}

impl Tracker {
    fn track(&mut self, entity: TrackedEntity) -> EntityRef {
        self.next_handle += 1;
        let handle = EntityRef(self.next_handle);
        self.entities.insert(handle, entity);
        handle
    }

    fn get(&self, entity: EntityRef) -> Result<&TrackedEntity> {
        self.entities
            .get(&entity)
            .ok_or(HistoryError::EntityNotTracked {
                handle: entity.handle(),
            })
    }

    fn get_mut(&mut self, entity: EntityRef) -> Result<&mut TrackedEntity> {
        self.entities
            .get_mut(&entity)
            .ok_or(HistoryError::EntityNotTracked {
                handle: entity.handle(),
            })
    }

    /// Tracked instance of a stored row.
    fn find(&self, table: &str, row_id: &str) -> Option<EntityRef> {
        self.entities
            .iter()
            .find(|(_, tracked)| {
                tracked.state != EntityState::Added
                    && tracked.entity_type.table == table
                    && tracked.row_id() == row_id
            })
            .map(|(handle, _)| *handle)
    }
}

impl EntityStaging for Tracker {
    fn detach(&mut self, entity: EntityRef) -> Result<()> {
        self.entities
            .remove(&entity)
            .map(|_| ())
            .ok_or(HistoryError::EntityNotTracked {
                handle: entity.handle(),
            })
    }

    fn reattach_modified(
        &mut self,
        entity_type: Arc<EntityType>,
        persisted: Option<Snapshot>,
        values: Snapshot,
    ) -> Result<EntityRef> {
        let modified = entity_type
            .properties
            .iter()
            .filter(|p| !p.key)
            .filter(|p| {
                persisted
                    .as_ref()
                    .is_none_or(|row| row.get(&p.name) != values.get(&p.name))
            })
            .map(|p| p.name.clone())
            .collect();

        Ok(self.track(TrackedEntity {
            entity_type,
            state: EntityState::Modified,
            original: persisted.clone().unwrap_or_else(|| values.clone()),
            current: values,
            modified,
            persisted: persisted.is_some(),
        }))
    }
}

/// Unit of work over a [`Database`].
pub struct Session<'db> {
    db: &'db Database,
    tracker: Tracker,
    history: HistoryStore<'db>,
    actor: Actor,
}

impl<'db> Session<'db> {
    /// Opens a session with an empty tracker and history store.
    pub fn new(db: &'db Database) -> Self {
        Self {
            db,
            tracker: Tracker::default(),
            history: HistoryStore::new(db),
            actor: Actor::default(),
        }
    }

    /// Sets the actor stamped on history records captured from now on.
    pub fn set_actor(&mut self, actor: Actor) {
        self.actor = actor;
    }

    /// Tracks a new entity; it is inserted on the next save.
    pub fn add(&mut self, entity_name: &str, values: Snapshot) -> Result<EntityRef> {
        let entity_type = self.db.catalog().resolve(entity_name)?;
        let values = checked_values(&entity_type, &values)?;
        Ok(self.tracker.track(TrackedEntity {
            entity_type,
            state: EntityState::Added,
            original: values.clone(),
            current: values,
            modified: BTreeSet::new(),
            persisted: false,
        }))
    }

    /// Tracks an existing row as Unchanged.
    ///
    /// An entity whose auto-increment key is null is tracked as Added instead.
    pub fn attach(&mut self, entity_name: &str, values: Snapshot) -> Result<EntityRef> {
        let entity_type = self.db.catalog().resolve(entity_name)?;
        let values = checked_values(&entity_type, &values)?;

        let generated_key_missing = entity_type
            .identity_key()
            .is_some_and(|key| values.get(&key.name).is_none_or(Value::is_null));
        if generated_key_missing {
            return self.add(entity_name, values);
        }
        if !entity_type.has_resolvable_key(&values) {
            return Err(HistoryError::MissingKey {
                entity: entity_type.name.clone(),
            });
        }

        let row_id = entity_type.row_id(&values);
        if let Some(existing) = self.tracker.find(&entity_type.table, &row_id) {
            return Err(HistoryError::DuplicateKey {
                table: entity_type.table.clone(),
                row_id: format!("{} (tracked as {})", row_id, existing),
            });
        }

        Ok(self.tracker.track(TrackedEntity {
            entity_type,
            state: EntityState::Unchanged,
            original: values.clone(),
            current: values,
            modified: BTreeSet::new(),
            persisted: true,
        }))
    }

    /// Loads a stored row, returning the tracked instance if one exists.
    pub fn load(&mut self, entity_name: &str, row_id: &str) -> Result<Option<EntityRef>> {
        let entity_type = self.db.catalog().resolve(entity_name)?;
        if let Some(tracked) = self.tracker.find(&entity_type.table, row_id) {
            return Ok(Some(tracked));
        }

        let Some(row) = self.db.get_row(&entity_type.table, row_id)? else {
            return Ok(None);
        };
        Ok(Some(self.tracker.track(TrackedEntity {
            entity_type,
            state: EntityState::Unchanged,
            original: row.clone(),
            current: row,
            modified: BTreeSet::new(),
            persisted: true,
        })))
    }

    /// Sets a property value.
    ///
    /// The property is flagged modified only when the value differs from the
    /// stored one. Keys of stored rows are read-only.
    pub fn set(&mut self, entity: EntityRef, property: &str, value: impl Into<Value>) -> Result<()> {
        let tracked = self.tracker.get_mut(entity)?;
        let definition = tracked.entity_type.property(property)?;
        let value = checked_value(&tracked.entity_type.name, definition, value.into())?;

        let differs = tracked.original.get(property) != Some(&value);
        if definition.key && tracked.state != EntityState::Added && differs {
            return Err(HistoryError::KeyReadOnly {
                entity: tracked.entity_type.name.clone(),
                property: property.to_string(),
            });
        }

        tracked.current.insert(property, value);
        if tracked.state == EntityState::Added {
            tracked.original = tracked.current.clone();
        } else if differs && matches!(tracked.state, EntityState::Unchanged | EntityState::Modified) {
            tracked.modified.insert(property.to_string());
            tracked.state = EntityState::Modified;
        }
        Ok(())
    }

    /// Flags a property modified without changing its value.
    pub fn mark_modified(&mut self, entity: EntityRef, property: &str) -> Result<()> {
        let tracked = self.tracker.get_mut(entity)?;
        tracked.entity_type.property(property)?;
        if matches!(tracked.state, EntityState::Unchanged | EntityState::Modified) {
            tracked.modified.insert(property.to_string());
            tracked.state = EntityState::Modified;
        }
        Ok(())
    }

    /// Marks an entity for deletion; an Added entity is simply detached.
    pub fn remove(&mut self, entity: EntityRef) -> Result<()> {
        let tracked = self.tracker.get_mut(entity)?;
        if tracked.state == EntityState::Added {
            self.tracker.detach(entity)?;
        } else {
            tracked.state = EntityState::Deleted;
        }
        Ok(())
    }

    /// Current value of a property.
    pub fn get(&self, entity: EntityRef, property: &str) -> Result<&Value> {
        let tracked = self.tracker.get(entity)?;
        tracked.entity_type.property(property)?;
        tracked
            .current
            .get(property)
            .ok_or_else(|| HistoryError::PropertyNotFound {
                entity: tracked.entity_type.name.clone(),
                property: property.to_string(),
            })
    }

    /// Current values of an entity.
    pub fn values(&self, entity: EntityRef) -> Result<&Snapshot> {
        Ok(&self.tracker.get(entity)?.current)
    }

    /// Tracking state; `Detached` for handles no longer tracked.
    pub fn state(&self, entity: EntityRef) -> EntityState {
        self.tracker
            .get(entity)
            .map_or(EntityState::Detached, |tracked| tracked.state)
    }

    /// Row id of a tracked entity.
    pub fn row_id(&self, entity: EntityRef) -> Result<String> {
        Ok(self.tracker.get(entity)?.row_id())
    }

    /// Number of tracked entities.
    pub fn tracked_count(&self) -> usize {
        self.tracker.entities.len()
    }

    /// Pending mutations of every tracked entity, in tracking order.
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.tracker
            .entities
            .iter()
            .map(|(handle, tracked)| tracked.pending_change(*handle))
            .collect()
    }

    /// Captures pending mutations into history records and stages them.
    ///
    /// Every record is encoded before any is staged, so an encoding failure
    /// stages nothing.
    ///
    /// # Returns
    /// The number of records staged.
    pub fn ensure_history(&mut self) -> Result<usize> {
        let db = self.db;
        let captured =
            ChangeCapture::new(db.catalog(), db.config()).capture(self.pending_changes());
        let encoder = DiffEncoder::new(db.config(), db).with_actor(self.actor.clone());

        let records = captured
            .iter()
            .map(|change| Ok((encoder.encode(change)?, change.entity)))
            .collect::<Result<Vec<_>>>()?;

        let count = records.len();
        for (record, entity) in records {
            let origin = (record.kind == ChangeKind::Added).then_some(entity);
            self.history.append(record, origin)?;
        }
        tracing::debug!(count, "history records staged");
        Ok(count)
    }

    /// Stages a rollback of a tracked entity.
    ///
    /// # Arguments
    /// * `entity` - Tracked entity to roll back
    /// * `history_id` - Record to roll back to; the latest record when `None`
    pub fn rollback(&mut self, entity: EntityRef, history_id: Option<i64>) -> Result<RollbackOutcome> {
        let tracked = self.tracker.get(entity)?;
        let row_id = tracked.row_id();
        let persisted = if tracked.persisted && !row_id.is_empty() {
            self.db.get_row(&tracked.entity_type.table, &row_id)?
        } else {
            None
        };
        let target = RollbackTarget {
            entity_name: tracked.entity_type.name.clone(),
            row_id,
            live: Some(LiveEntity {
                entity,
                state: tracked.state,
                values: tracked.original.clone(),
            }),
            persisted,
        };
        self.resolve_rollback(&target, history_id)
    }

    /// Stages a rollback of a stored or deleted row identified by its row id.
    pub fn rollback_row(
        &mut self,
        entity_name: &str,
        row_id: &str,
        history_id: Option<i64>,
    ) -> Result<RollbackOutcome> {
        let entity_type = self
            .db
            .catalog()
            .get(entity_name)
            .ok_or_else(|| HistoryError::Precondition {
                entity: entity_name.to_string(),
                reason: "entity type is not registered".to_string(),
            })?;

        let live = self
            .tracker
            .find(&entity_type.table, row_id)
            .and_then(|handle| {
                self.tracker.get(handle).ok().map(|tracked| LiveEntity {
                    entity: handle,
                    state: tracked.state,
                    values: tracked.original.clone(),
                })
            });
        let target = RollbackTarget {
            entity_name: entity_type.name.clone(),
            row_id: row_id.to_string(),
            live,
            persisted: self.db.get_row(&entity_type.table, row_id)?,
        };
        self.resolve_rollback(&target, history_id)
    }

    fn resolve_rollback(
        &mut self,
        target: &RollbackTarget,
        history_id: Option<i64>,
    ) -> Result<RollbackOutcome> {
        RollbackResolver::new(self.db.catalog()).rollback(
            target,
            history_id,
            &mut self.history,
            &mut self.tracker,
        )
    }

    /// Commits tracked entity writes and staged history operations together.
    ///
    /// # Returns
    /// The number of affected rows, history appends and retirements included.
    pub fn save_changes(&mut self) -> Result<usize> {
        let mut handle = TransactionHandle::new();
        let tx = handle.transaction_mut();

        for (entity, tracked) in &self.tracker.entities {
            let entity_type = &tracked.entity_type;
            match tracked.state {
                EntityState::Added => {
                    tx.stage_create(entity_type, tracked.current.clone(), Some(*entity))?
                }
                EntityState::Modified if tracked.persisted => {
                    tx.stage_update(entity_type, tracked.row_id(), tracked.current.clone())?
                }
                EntityState::Modified => {
                    tx.stage_create(entity_type, tracked.current.clone(), Some(*entity))?
                }
                EntityState::Deleted if tracked.persisted => {
                    tx.stage_delete(entity_type, tracked.row_id(), tracked.original.clone())?
                }
                EntityState::Deleted | EntityState::Unchanged | EntityState::Detached => {}
            }
        }
        tx.stage_history(self.history.staged().to_vec())?;

        let summary = self.db.commit_transaction(&mut handle)?;
        self.history.take_staged();

        let handles: Vec<EntityRef> = self.tracker.entities.keys().copied().collect();
        for entity in handles {
            let state = self.tracker.get(entity)?.state;
            if state == EntityState::Deleted {
                self.tracker.detach(entity)?;
                continue;
            }

            let stored = match summary.assigned.get(&entity) {
                Some(row_id) => {
                    let table = self.tracker.get(entity)?.entity_type.table.clone();
                    self.db.get_row(&table, row_id)?
                }
                None => None,
            };
            let tracked = self.tracker.get_mut(entity)?;
            if let Some(row) = stored {
                tracked.current = row;
            }
            tracked.original = tracked.current.clone();
            tracked.modified.clear();
            tracked.persisted = true;
            tracked.state = EntityState::Unchanged;
        }

        tracing::info!(
            affected = summary.affected,
            history_appended = summary.appended.len(),
            "changes saved"
        );
        Ok(summary.affected)
    }

    /// Discards staged history and reverts tracked entities to their stored values.
    pub fn discard(&mut self) {
        self.history.discard();
        self.tracker.entities.retain(|_, tracked| tracked.persisted);
        for tracked in self.tracker.entities.values_mut() {
            tracked.current = tracked.original.clone();
            tracked.modified.clear();
            tracked.state = EntityState::Unchanged;
        }
    }

    /// History operations staged in this session.
    pub fn staged_history(&self) -> &HistoryStore<'db> {
        &self.history
    }
}

/// Checks a value against its property definition.
fn checked_value(entity: &str, definition: &PropertyDef, value: Value) -> Result<Value> {
    let found = value.kind();
    value
        .coerce(definition.kind, definition.nullable || definition.key)
        .ok_or_else(|| HistoryError::TypeMismatch {
            property: format!("{}.{}", entity, definition.name),
            expected: definition.kind.to_string(),
            got: found.map_or_else(|| "null".to_string(), |k| k.to_string()),
        })
}

/// Checks every supplied value and fills missing properties with null.
fn checked_values(entity_type: &EntityType, values: &Snapshot) -> Result<Snapshot> {
    for name in values.keys() {
        entity_type.property(name)?;
    }

    entity_type
        .properties
        .iter()
        .map(|definition| {
            let value = values.get(&definition.name).cloned().unwrap_or_default();
            Ok((
                definition.name.clone(),
                checked_value(&entity_type.name, definition, value)?,
            ))
        })
        .collect()
}
