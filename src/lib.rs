// Library module for docsync
// Re-exports modules for use in integration tests and the CLI

pub mod config;
pub mod error;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use store::{DocumentStore, LocalStore, MemoryStore};
pub use sync::{synchronize, SyncEngine, SynchronizeEvent, TransferResult};
