//! Change and history data model.

mod change;
mod property;
mod record;

pub use change::{EntityRef, EntityState, PendingChange};
pub use property::PropertyDelta;
pub use record::{Actor, ChangeKind, ChangeSet, HistoryRecord, ADDED_ROW_ID};
