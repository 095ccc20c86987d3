//! On-disk file formats.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::catalog::EntityType;
use crate::model::HistoryRecord;
use crate::value::Snapshot;

/// Current schema file version.
pub const SCHEMA_VERSION: u32 = 1;

/// Checksum key of the history data file.
pub const HISTORY_CHECKSUM_KEY: &str = "history";

/// Schema file format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaFile {
    /// Schema version
    pub version: u32,
    /// Registered entity types
    pub entities: Vec<EntityType>,
    /// Data file checksums for corruption detection
    #[serde(default)]
    pub checksums: HashMap<String, u32>,
}

/// Rows of one table.
#[derive(Debug, Serialize, Deserialize)]
pub struct TableData {
    /// Next auto-increment key value
    pub next_id: i64,
    /// Rows keyed by row id
    pub rows: BTreeMap<String, Snapshot>,
}

/// Committed history log.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryData {
    /// Next history record id
    pub next_id: i64,
    /// Records in id order
    pub records: Vec<HistoryRecord>,
}
