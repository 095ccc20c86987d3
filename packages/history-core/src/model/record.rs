use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::EntityState;
use crate::error::{HistoryError, Result};
use crate::value::Snapshot;

/// Row id recorded for Added mutations before the storage engine assigns a key.
pub const ADDED_ROW_ID: &str = "0";

/// Kind of a captured mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Maps an entity state to a change kind; `None` for untracked states.
    pub fn from_state(state: EntityState) -> Option<Self> {
        match state {
            EntityState::Added => Some(ChangeKind::Added),
            EntityState::Modified => Some(ChangeKind::Modified),
            EntityState::Deleted => Some(ChangeKind::Deleted),
            EntityState::Unchanged | EntityState::Detached => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "Added",
            ChangeKind::Modified => "Modified",
            ChangeKind::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Before and after maps of one captured mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
}

impl ChangeSet {
    /// Returns `true` if the payload layout matches the change kind.
    pub fn matches_kind(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Added => self.before.is_none() && self.after.is_some(),
            ChangeKind::Modified => self.before.is_some() && self.after.is_some(),
            ChangeKind::Deleted => self.before.is_some() && self.after.is_none(),
        }
    }
}

/// Actor metadata stamped on captured records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Actor {
    pub created_by: Option<String>,
    pub ip_address: Option<String>,
}

impl Actor {
    /// Creates an actor identified by name.
    pub fn named(created_by: impl Into<String>) -> Self {
        Self {
            created_by: Some(created_by.into()),
            ip_address: None,
        }
    }

    /// Sets the client address.
    pub fn from_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

/// One append-only history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Assigned by the store on commit; `0` while staged
    pub id: i64,
    /// Comma-joined key values of the affected row
    pub row_id: String,
    /// Table of the affected row
    pub table_name: String,
    /// Entity type of the affected row
    pub entity_name: String,
    /// Mutation kind
    pub kind: ChangeKind,
    /// Serialized [`ChangeSet`]
    pub changed: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Previous record of the same row
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl HistoryRecord {
    /// Parses the stored payload, checking it against the record kind.
    pub fn change_set(&self) -> Result<ChangeSet> {
        let change_set: ChangeSet =
            serde_json::from_str(&self.changed).map_err(|e| HistoryError::MalformedPayload {
                history_id: self.id,
                reason: e.to_string(),
            })?;

        if !change_set.matches_kind(self.kind) {
            return Err(HistoryError::MalformedPayload {
                history_id: self.id,
                reason: format!("payload layout does not match kind {}", self.kind),
            });
        }
        Ok(change_set)
    }

    /// Parsed `before` map.
    pub fn before(&self) -> Result<Option<Snapshot>> {
        Ok(self.change_set()?.before)
    }

    /// Parsed `after` map.
    pub fn after(&self) -> Result<Option<Snapshot>> {
        Ok(self.change_set()?.after)
    }

    /// Returns `true` while the record has not been committed.
    pub fn is_staged(&self) -> bool {
        self.id == 0
    }
}
