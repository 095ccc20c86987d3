//! History engine configuration.

use std::path::PathBuf;

/// Payload column length used when a non-positive limit is configured.
pub const DEFAULT_CHANGED_MAX_LENGTH: usize = 2048;

/// How the encoder resolves a `before` value when a property is flagged
/// modified but its original and current values are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageFallback {
    /// Fetch the persisted pre-transaction value from storage
    #[default]
    Fetch,
    /// Use the original value without touching storage
    Approximate,
}

/// History engine configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Keep Added mutations when capturing history
    pub capture_added: bool,
    /// Keep key and foreign-key properties in the Added `after` map
    pub added_includes_keys: bool,
    /// Resolution of modified-but-equal properties
    pub storage_fallback: StorageFallback,
    /// Maximum payload text length (`None` = unbounded)
    pub changed_max_length: Option<i64>,
    /// Whether `changed_max_length` is enforced
    pub limit_changed_length: bool,
    /// Maximum row id length
    pub row_id_max_length: usize,
    /// Maximum table name length
    pub table_max_length: usize,
    /// Indent serialized payload text
    pub pretty_payload: bool,
    /// Data directory for persistence
    pub data_dir: PathBuf,
    /// Maximum retry attempts for transient I/O errors
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub persistence_retry_delay_ms: u64,
}

impl HistoryConfig {
    /// Returns the enforced payload length limit, if any.
    ///
    /// Non-positive configured limits fall back to [`DEFAULT_CHANGED_MAX_LENGTH`].
    pub fn effective_changed_max_length(&self) -> Option<usize> {
        if !self.limit_changed_length {
            return None;
        }
        self.changed_max_length.map(|max| {
            if max <= 0 {
                DEFAULT_CHANGED_MAX_LENGTH
            } else {
                max as usize
            }
        })
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capture_added: false,
            added_includes_keys: false,
            storage_fallback: StorageFallback::Fetch,
            changed_max_length: Some(DEFAULT_CHANGED_MAX_LENGTH as i64),
            limit_changed_length: true,
            row_id_max_length: 50,
            table_max_length: 128,
            pretty_payload: false,
            data_dir: PathBuf::from("./data"),
            persistence_max_retries: 3,
            persistence_retry_delay_ms: 100,
        }
    }
}
