//! Audit-trail engine for persisted records.
//!
//! Captures pending mutations as before/after history records appended in the
//! same transaction as the mutation, keeps a parent chain per row, and rolls
//! rows back to a captured state. Includes an in-memory storage engine with
//! change-tracking sessions and file persistence.

pub mod capture;
pub mod catalog;
pub mod config;
pub mod database;
pub mod encoder;
pub mod error;
pub mod model;
pub mod persistence;
pub mod rollback;
pub mod session;
pub mod store;
pub mod table;
pub mod transaction;
pub mod value;

pub use capture::ChangeCapture;
pub use catalog::{EntityCatalog, EntityType, PropertyDef};
pub use config::{HistoryConfig, StorageFallback};
pub use database::Database;
pub use encoder::{DiffEncoder, StorageValues};
pub use error::{HistoryError, Result};
pub use model::{
    Actor, ChangeKind, ChangeSet, EntityRef, EntityState, HistoryRecord, PendingChange,
    PropertyDelta, ADDED_ROW_ID,
};
pub use rollback::{RollbackOutcome, RollbackResolver};
pub use session::Session;
pub use store::{verify_chain, ChainViolation, HistoryLog, HistoryStore};
pub use value::{Snapshot, Value, ValueKind};
