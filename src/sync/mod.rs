//! Document synchronization engine.
//!
//! Replicates metadata records and their backing files from a source
//! store to a target store, one bounded-concurrency unit per document.

pub mod conflict;
pub mod engine;
pub mod progress;
pub mod queue;
pub mod throttle;
pub mod transfer;
pub mod version;

pub use conflict::{decide, Verdict};
pub use engine::{synchronize, SyncEngine};
pub use progress::{channel_listener, ProgressTracker, SynchronizeEvent, SynchronizeListener};
pub use queue::{QueueReport, UnitFailure, WorkQueue};
pub use throttle::{BandwidthLimit, BandwidthLimiter};
pub use transfer::{DocumentOutcome, FileOutcome, TransferResult, TransferRefs};
pub use version::{VersionId, VersionPolicy};
