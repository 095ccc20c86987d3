//! Transaction isolation, staging buffers, and atomic commit.

mod change;
mod staging_buffer;
#[allow(clippy::module_inception)]
mod transaction;
mod transaction_handle;

pub use change::Change;
pub use staging_buffer::StagingBuffer;
pub use transaction::{CommitSummary, Transaction};
pub use transaction_handle::TransactionHandle;
