use crate::model::EntityRef;
use crate::value::Snapshot;

/// Represents a single staged change to a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new row
    Create {
        /// Property values; a null identity key is assigned on commit
        values: Snapshot,
        /// Tracked entity that receives the assigned row id
        origin: Option<EntityRef>,
    },
    /// Replace an existing row
    Update {
        /// Row id of the row to replace
        row_id: String,
        /// New property values
        values: Snapshot,
    },
    /// Delete a row
    Delete {
        /// Row id of the row to delete
        row_id: String,
        /// Row as read by the unit of work (for conflict detection)
        original: Snapshot,
    },
}
