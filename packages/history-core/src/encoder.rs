//! Encoding of captured mutations into history records.
//!
//! - Added: `after` holds every property except keys and foreign keys (unless
//!   configured otherwise), `before` is absent, row id is [`ADDED_ROW_ID`].
//! - Modified: `before`/`after` hold only the modified properties.
//! - Deleted: `before` holds every property, `after` is absent.

use chrono::Utc;

use crate::config::{HistoryConfig, StorageFallback};
use crate::error::{HistoryError, Result};
use crate::model::{
    Actor, ChangeKind, ChangeSet, HistoryRecord, PendingChange, PropertyDelta, ADDED_ROW_ID,
};
use crate::value::{Snapshot, Value};

/// Access to persisted (pre-transaction) property values.
pub trait StorageValues {
    /// Returns the persisted value of a property of the changed row, or `None`
    /// when the row is not persisted.
    fn persisted_value(&self, change: &PendingChange, property: &str) -> Result<Option<Value>>;
}

/// Turns captured mutations into history records.
pub struct DiffEncoder<'a> {
    config: &'a HistoryConfig,
    storage: &'a dyn StorageValues,
    actor: Actor,
}

impl<'a> DiffEncoder<'a> {
    /// Creates an encoder reading fallback values from `storage`.
    pub fn new(config: &'a HistoryConfig, storage: &'a dyn StorageValues) -> Self {
        Self {
            config,
            storage,
            actor: Actor::default(),
        }
    }

    /// Stamps every encoded record with the given actor.
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Encodes one captured mutation.
    ///
    /// # Returns
    /// `Err(HistoryError::UnsupportedState)` for Unchanged or Detached mutations.
    pub fn encode(&self, change: &PendingChange) -> Result<HistoryRecord> {
        let kind =
            ChangeKind::from_state(change.state).ok_or_else(|| HistoryError::UnsupportedState {
                entity: change.entity_name.clone(),
                state: change.state.to_string(),
            })?;

        let (row_id, change_set) = match kind {
            ChangeKind::Added => (ADDED_ROW_ID.to_string(), self.encode_added(change)),
            ChangeKind::Modified => (change.row_id(), self.encode_modified(change)?),
            ChangeKind::Deleted => (change.row_id(), Self::encode_deleted(change)),
        };

        let changed = if self.config.pretty_payload {
            serde_json::to_string_pretty(&change_set)
        } else {
            serde_json::to_string(&change_set)
        }
        .map_err(|e| HistoryError::SerializationError(e.to_string()))?;

        tracing::debug!(
            entity = %change.entity_name,
            row_id = %row_id,
            kind = %kind,
            "encoded history record"
        );

        Ok(HistoryRecord {
            id: 0,
            row_id,
            table_name: change.table_name.clone(),
            entity_name: change.entity_name.clone(),
            kind,
            changed,
            created_at: Utc::now(),
            parent_id: None,
            created_by: self.actor.created_by.clone(),
            ip_address: self.actor.ip_address.clone(),
        })
    }

    fn encode_added(&self, change: &PendingChange) -> ChangeSet {
        let after: Snapshot = change
            .properties
            .iter()
            .filter(|p| self.config.added_includes_keys || !(p.is_key || p.is_foreign_key))
            .map(|p| (p.name.clone(), p.current_value.clone()))
            .collect();

        ChangeSet {
            before: None,
            after: Some(after),
        }
    }

    fn encode_modified(&self, change: &PendingChange) -> Result<ChangeSet> {
        let mut before = Snapshot::new();
        let mut after = Snapshot::new();

        for property in change.properties.iter().filter(|p| p.is_modified) {
            before.insert(property.name.clone(), self.before_value(change, property)?);
            after.insert(property.name.clone(), property.current_value.clone());
        }

        Ok(ChangeSet {
            before: Some(before),
            after: Some(after),
        })
    }

    fn encode_deleted(change: &PendingChange) -> ChangeSet {
        let before: Snapshot = change
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.original_value.clone()))
            .collect();

        ChangeSet {
            before: Some(before),
            after: None,
        }
    }

    /// Resolves the `before` value of a modified property.
    ///
    /// A property flagged modified whose original equals its current value
    /// had its real prior value only in storage.
    fn before_value(&self, change: &PendingChange, property: &PropertyDelta) -> Result<Value> {
        if property.original_value.is_null() {
            return Ok(Value::Null);
        }
        if property.original_value != property.current_value {
            return Ok(property.original_value.clone());
        }

        match self.config.storage_fallback {
            StorageFallback::Fetch => Ok(self
                .storage
                .persisted_value(change, &property.name)?
                .unwrap_or_default()),
            StorageFallback::Approximate => Ok(property.original_value.clone()),
        }
    }
}
