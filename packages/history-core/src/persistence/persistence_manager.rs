use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc32fast::Hasher;

use crate::catalog::EntityCatalog;
use crate::config::HistoryConfig;
use crate::database::Database;
use crate::error::{HistoryError, Result};

use super::io_utils::{classify_io_error, retry_io_operation};
use super::schema::{HistoryData, SchemaFile, TableData, HISTORY_CHECKSUM_KEY, SCHEMA_VERSION};

/// Saves and loads a [`Database`] under a data directory.
///
/// Layout: `schema.json`, `data/<table>.json` and `data/history.json`.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    /// Root directory of the persisted database
    data_dir: PathBuf,
    /// Maximum retry attempts for transient I/O errors
    max_retries: u32,
    /// Delay between retry attempts in milliseconds
    retry_delay_ms: u64,
}

impl PersistenceManager {
    /// Creates a new persistence manager with the given configuration.
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            max_retries: config.persistence_max_retries,
            retry_delay_ms: config.persistence_retry_delay_ms,
        }
    }

    /// Returns the data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn schema_path(&self) -> PathBuf {
        self.data_dir.join("schema.json")
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.data_dir.join("data").join(format!("{}.json", table))
    }

    fn history_path(&self) -> PathBuf {
        self.data_dir.join("data").join("history.json")
    }

    /// Saves every table, the history log and the schema.
    ///
    /// Data files are written first; the schema, which carries their
    /// checksums, is replaced last.
    ///
    /// # Arguments
    /// * `db` - Database to save
    ///
    /// # Returns
    /// `Result<()>` indicating success or failure.
    pub fn save(&self, db: &Database) -> Result<()> {
        let mut checksums = HashMap::new();

        for table in db.tables_snapshot()? {
            let data = TableData {
                next_id: table.next_id(),
                rows: table.rows.clone(),
            };
            let checksum = self.write_json(&self.table_path(&table.name), &data, "table data")?;
            checksums.insert(table.name.clone(), checksum);
        }

        let history = db.history_snapshot()?;
        let data = HistoryData {
            next_id: history.next_id(),
            records: history.records().cloned().collect(),
        };
        let checksum = self.write_json(&self.history_path(), &data, "history data")?;
        checksums.insert(HISTORY_CHECKSUM_KEY.to_string(), checksum);

        let schema = SchemaFile {
            version: SCHEMA_VERSION,
            entities: db
                .catalog()
                .entity_types()
                .iter()
                .map(|entity| entity.as_ref().clone())
                .collect(),
            checksums,
        };
        self.write_json(&self.schema_path(), &schema, "schema")?;

        tracing::info!(
            data_dir = %self.data_dir.display(),
            tables = schema.entities.len(),
            history_records = data.records.len(),
            "database saved"
        );
        Ok(())
    }

    /// Loads a database, verifying data file checksums.
    ///
    /// A missing schema file yields an empty database.
    pub fn load(&self, config: HistoryConfig) -> Result<Database> {
        let schema_path = self.schema_path();
        if !schema_path.exists() {
            return Ok(Database::new(config));
        }

        let contents = self.read_file(&schema_path, "schema")?;
        let schema: SchemaFile = serde_json::from_slice(&contents).map_err(|e| {
            HistoryError::SerializationError(format!("Failed to parse schema: {}", e))
        })?;
        if schema.version != SCHEMA_VERSION {
            return Err(HistoryError::DataCorruption(format!(
                "Unsupported schema version {}",
                schema.version
            )));
        }

        let catalog = Arc::new(EntityCatalog::new());
        for entity in schema.entities {
            catalog.register(entity)?;
        }
        let db = Database::with_catalog(catalog, config);

        for entity in db.catalog().entity_types() {
            let path = self.table_path(&entity.table);
            if !path.exists() {
                continue;
            }
            let contents = self.read_file(&path, "table data")?;
            verify_checksum(&schema.checksums, &entity.table, &contents)?;
            let data: TableData = serde_json::from_slice(&contents).map_err(|e| {
                HistoryError::SerializationError(format!(
                    "Failed to parse data of table '{}': {}",
                    entity.table, e
                ))
            })?;
            db.restore_table(&entity.table, data.rows, data.next_id)?;
        }

        let path = self.history_path();
        if path.exists() {
            let contents = self.read_file(&path, "history data")?;
            verify_checksum(&schema.checksums, HISTORY_CHECKSUM_KEY, &contents)?;
            let data: HistoryData = serde_json::from_slice(&contents).map_err(|e| {
                HistoryError::SerializationError(format!("Failed to parse history: {}", e))
            })?;
            db.restore_history(data.records, data.next_id)?;
        }

        tracing::info!(data_dir = %self.data_dir.display(), "database loaded");
        Ok(db)
    }

    /// Serializes a value and writes it atomically.
    ///
    /// # Returns
    /// The CRC32 checksum of the written bytes.
    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T, what: &str) -> Result<u32> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| HistoryError::SerializationError(e.to_string()))?;

        let mut hasher = Hasher::new();
        hasher.update(&json);
        let checksum = hasher.finalize();

        retry_io_operation(
            || write_atomic(path, &json),
            self.max_retries,
            self.retry_delay_ms,
            what,
        )?;
        Ok(checksum)
    }

    fn read_file(&self, path: &Path, what: &str) -> Result<Vec<u8>> {
        retry_io_operation(
            || {
                let mut file =
                    File::open(path).map_err(|e| classify_io_error(e, "Failed to open file"))?;
                let mut contents = Vec::new();
                file.read_to_end(&mut contents)
                    .map_err(|e| classify_io_error(e, "Failed to read file"))?;
                Ok(contents)
            },
            self.max_retries,
            self.retry_delay_ms,
            what,
        )
    }
}

/// Writes to a temporary file, syncs it, then renames it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file =
        File::create(&temp_path).map_err(|e| classify_io_error(e, "Failed to create temp file"))?;
    file.write_all(bytes)
        .map_err(|e| classify_io_error(e, "Failed to write file"))?;
    file.sync_all()
        .map_err(|e| classify_io_error(e, "Failed to sync file"))?;

    // Atomic rename
    fs::rename(&temp_path, path).map_err(|e| classify_io_error(e, "Failed to rename file"))?;
    Ok(())
}

/// Verifies the checksum recorded for a data file.
fn verify_checksum(checksums: &HashMap<String, u32>, key: &str, data: &[u8]) -> Result<()> {
    let Some(expected_checksum) = checksums.get(key) else {
        return Ok(());
    };

    let mut hasher = Hasher::new();
    hasher.update(data);
    let actual_checksum = hasher.finalize();

    if actual_checksum != *expected_checksum {
        return Err(HistoryError::DataCorruption(format!(
            "Checksum mismatch for '{}': expected {:08x}, got {:08x}",
            key, expected_checksum, actual_checksum
        )));
    }
    Ok(())
}
