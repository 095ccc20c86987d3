//! Database persistence: schema file, table data files and the history log.


mod io_utils;
mod persistence_manager;
mod schema;

pub use io_utils::{classify_io_error, retry_io_operation};
pub use persistence_manager::PersistenceManager;
pub use schema::{HistoryData, SchemaFile, TableData, HISTORY_CHECKSUM_KEY, SCHEMA_VERSION};
