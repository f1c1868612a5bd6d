//! Store capabilities and reference store implementations.

pub mod backend;
pub mod local;
pub mod memory;
pub mod transport;
pub mod types;

pub use backend::DocumentStore;
pub use local::LocalStore;
pub use memory::{MemoryStore, MemoryTransport, WriteCounts};
pub use transport::{ByteTransport, FileTransport};
pub use types::*;
