use std::fmt;

use super::property::PropertyDelta;

/// Tracking state of an entity within a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// New entity, inserted on commit
    Added,
    /// Existing entity with pending property changes
    Modified,
    /// Existing entity, removed on commit
    Deleted,
    /// Existing entity without pending changes
    Unchanged,
    /// Not tracked
    Detached,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
            EntityState::Unchanged => "Unchanged",
            EntityState::Detached => "Detached",
        };
        f.write_str(name)
    }
}

/// Handle of an entity tracked by a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef(pub(crate) u64);

impl EntityRef {
    /// Creates a handle from its raw value.
    pub fn new(handle: u64) -> Self {
        Self(handle)
    }

    /// Returns the raw handle value.
    pub fn handle(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A mutation pending for the current commit, as reported by the change tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Tracked entity
    pub entity: EntityRef,
    /// Entity type name
    pub entity_name: String,
    /// Table name of the entity type
    pub table_name: String,
    /// Mutation state
    pub state: EntityState,
    /// Properties in declaration order
    pub properties: Vec<PropertyDelta>,
}

impl PendingChange {
    /// Builds the row id from the current key values, skipping nulls.
    pub fn row_id(&self) -> String {
        self.properties
            .iter()
            .filter(|p| p.is_key && !p.current_value.is_null())
            .map(|p| p.current_value.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Looks up a property delta by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDelta> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns `true` if any property is flagged modified.
    pub fn has_modified_properties(&self) -> bool {
        self.properties.iter().any(|p| p.is_modified)
    }
}
