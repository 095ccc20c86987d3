//! History engine error types.

use thiserror::Error;

/// History capture, storage and rollback errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    /// Mutation state the encoder cannot turn into a history record
    #[error("Unsupported entity state {state} for '{entity}': only Added, Modified and Deleted are captured")]
    UnsupportedState { entity: String, state: String },

    /// Entity name stored in a history record does not resolve to a registered type
    #[error("Entity type '{entity}' cannot be resolved")]
    TypeResolution { entity: String },

    /// Stored payload text failed to parse or does not fit its entity type
    #[error("Malformed payload in history record {history_id}: {reason}")]
    MalformedPayload { history_id: i64, reason: String },

    /// Rollback requested for an entity that cannot be rolled back
    #[error("Rollback precondition failed for '{entity}': {reason}")]
    Precondition { entity: String, reason: String },

    /// Entity has no usable primary key value
    #[error("Entity '{entity}' has no key value and no generated key")]
    MissingKey { entity: String },

    /// Key properties of a persisted entity are read-only
    #[error("Key property '{property}' of '{entity}' cannot be modified")]
    KeyReadOnly { entity: String, property: String },

    /// Value does not match the declared property kind
    #[error("Type mismatch for '{property}': expected {expected}, got {got}")]
    TypeMismatch {
        property: String,
        expected: String,
        got: String,
    },

    /// Entity handle is not tracked by the session
    #[error("Entity {handle} is not tracked by this session")]
    EntityNotTracked { handle: u64 },

    /// Property not declared on the entity type
    #[error("Property '{property}' not found on entity '{entity}'")]
    PropertyNotFound { entity: String, property: String },

    /// Entity type registered twice
    #[error("Entity type '{0}' already registered")]
    TypeAlreadyRegistered(String),

    /// Table already exists
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    /// Table not found
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    /// Row not found
    #[error("Row '{row_id}' not found in table '{table}'")]
    RecordNotFound { table: String, row_id: String },

    /// Row key already present
    #[error("Duplicate key '{row_id}' in table '{table}'")]
    DuplicateKey { table: String, row_id: String },

    /// Column value longer than the configured storage limit
    #[error("Column '{column}' length {length} exceeds maximum {max}")]
    ColumnTooLong {
        column: &'static str,
        length: usize,
        max: usize,
    },

    /// Transaction conflict
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    /// Disk full error during persistence
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// I/O error during persistence
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient I/O error that may succeed on retry
    #[error("Transient I/O error: {0}")]
    TransientIoError(String),
}

impl HistoryError {
    /// Returns `true` for per-record rollback failures that are logged and skipped
    /// instead of propagated.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HistoryError::TypeResolution { .. } | HistoryError::MalformedPayload { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HistoryError>;
