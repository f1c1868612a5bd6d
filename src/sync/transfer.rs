//! Per-document transfer handlers and the run-wide result ledger.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::store::backend::DocumentStore;
use crate::store::transport::ByteTransport;
use crate::store::types::{Backend, DocumentMetaRef, FileRef};
use crate::sync::conflict::{decide, Verdict};
use crate::sync::progress::{ProgressTracker, SynchronizeEvent, SynchronizeListener};
use crate::sync::queue::UnitFailure;
use crate::sync::throttle::BandwidthLimiter;
use crate::sync::version::VersionPolicy;

/// Fingerprints and files touched by a run, in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRefs {
    pub fingerprints: Vec<String>,
    pub files: Vec<FileRef>,
}

impl TransferRefs {
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty() && self.files.is_empty()
    }
}

/// Outcome of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferResult {
    /// Records and files written to the target.
    pub mutations: TransferRefs,
    /// Records left untouched because both sides hold the same version,
    /// with their backing files.
    pub conflicts: TransferRefs,
    /// Units that failed and left their document unsynchronized.
    pub failures: Vec<UnitFailure>,
    /// File bytes written to the target.
    pub bytes_transferred: u64,
}

/// What a file transfer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Target already had the file.
    Present,
    /// Source had no such file.
    Missing,
    /// File copied; carries the byte count.
    Written(u64),
}

/// What a document transfer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Source no longer has the record.
    Missing,
    Resolved(Verdict),
}

#[derive(Debug, Default)]
struct LedgerState {
    result: TransferResult,
    completed: usize,
}

/// Shared accumulator for a run.
///
/// Units only append outcomes and mark themselves complete; the
/// completion count and the event it produces are updated under one lock
/// so listeners see `completed` strictly increasing.
pub struct TransferLedger<'a> {
    state: Mutex<LedgerState>,
    tracker: ProgressTracker,
    listener: Option<&'a dyn SynchronizeListener>,
    file_locks: Mutex<HashMap<(Backend, FileRef), Arc<tokio::sync::Mutex<()>>>>,
}

impl<'a> TransferLedger<'a> {
    pub fn new(tracker: ProgressTracker, listener: Option<&'a dyn SynchronizeListener>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            tracker,
            listener,
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_mutation(&self, fingerprint: &str) {
        self.state
            .lock()
            .result
            .mutations
            .fingerprints
            .push(fingerprint.to_string());
    }

    pub fn record_file(&self, file: FileRef, bytes: u64) {
        let mut state = self.state.lock();
        state.result.mutations.files.push(file);
        state.result.bytes_transferred += bytes;
    }

    pub fn record_conflict(&self, fingerprint: &str, file: Option<FileRef>) {
        let mut state = self.state.lock();
        state.result.conflicts.fingerprints.push(fingerprint.to_string());
        state.result.conflicts.files.extend(file);
    }

    pub fn record_failures(&self, failures: impl IntoIterator<Item = UnitFailure>) {
        self.state.lock().result.failures.extend(failures);
    }

    /// Mark one unit finished and notify the listener.
    pub fn complete(&self) -> SynchronizeEvent {
        let mut state = self.state.lock();
        state.completed = (state.completed + 1).min(self.tracker.total());
        let event = self.tracker.snapshot(state.completed);
        if let Some(listener) = self.listener {
            listener.on_event(event);
        }
        event
    }

    /// Notify the listener of the current count without completing a unit.
    pub fn announce(&self) -> SynchronizeEvent {
        let state = self.state.lock();
        let event = self.tracker.snapshot(state.completed);
        if let Some(listener) = self.listener {
            listener.on_event(event);
        }
        event
    }

    /// Lock serializing transfers of one file within the run.
    fn file_lock(&self, backend: Backend, file: &FileRef) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.file_locks
                .lock()
                .entry((backend, file.clone()))
                .or_default(),
        )
    }

    pub fn finish(self) -> TransferResult {
        self.state.into_inner().result
    }
}

/// Everything a unit needs to move one document.
pub struct TransferContext<'a> {
    pub source: &'a dyn DocumentStore,
    pub target: &'a dyn DocumentStore,
    pub transport: &'a dyn ByteTransport,
    pub limiter: &'a BandwidthLimiter,
    pub policy: VersionPolicy,
    pub ledger: &'a TransferLedger<'a>,
}

/// Copy one file from source to target unless the target already has it.
///
/// Bytes are written under the tier the source descriptor names, which
/// may differ from `backend`.
pub async fn transfer_file(
    ctx: &TransferContext<'_>,
    backend: Backend,
    file: &FileRef,
) -> Result<FileOutcome> {
    // Units sharing a file wait here; the loser then sees it present
    let lock = ctx.ledger.file_lock(backend, file);
    let _guard = lock.lock().await;

    if ctx
        .target
        .contains_file(backend, file)
        .await
        .with_context(|| format!("Failed to check {} in {}", file, ctx.target.name()))?
    {
        debug!(%file, %backend, "File already present in target");
        return Ok(FileOutcome::Present);
    }

    let Some(descriptor) = ctx
        .source
        .get_file_descriptor(backend, file)
        .await
        .with_context(|| format!("Failed to locate {} in {}", file, ctx.source.name()))?
    else {
        debug!(%file, %backend, "File missing from source");
        return Ok(FileOutcome::Missing);
    };

    let data = ctx
        .transport
        .fetch_bytes(&descriptor.url)
        .await
        .with_context(|| format!("Failed to fetch {}", descriptor.url))?;
    let size = data.len() as u64;

    ctx.limiter.acquire(data.len()).await;

    ctx.target
        .write_file(descriptor.backend, file, data, &descriptor.meta)
        .await
        .with_context(|| format!("Failed to write {} to {}", file, ctx.target.name()))?;

    debug!(%file, backend = %descriptor.backend, size, "Copied file");
    ctx.ledger.record_file(file.clone(), size);
    Ok(FileOutcome::Written(size))
}

/// Synchronize one document: its backing file first, then its metadata.
pub async fn transfer_document(
    ctx: &TransferContext<'_>,
    meta_ref: &DocumentMetaRef,
) -> Result<DocumentOutcome> {
    let fingerprint = meta_ref.fingerprint.as_str();

    let Some(meta) = ctx
        .source
        .get_document_meta(fingerprint)
        .await
        .with_context(|| format!("Failed to load {} from {}", fingerprint, ctx.source.name()))?
    else {
        debug!(fingerprint, "Document removed from source, skipping");
        return Ok(DocumentOutcome::Missing);
    };

    // Metadata must never land before the file it references
    let file = meta.backing_file();
    if let Some(file) = &file {
        transfer_file(ctx, Backend::Stash, file).await?;
    }

    let existing = if ctx
        .target
        .contains_document_meta(fingerprint)
        .await
        .with_context(|| format!("Failed to check {} in {}", fingerprint, ctx.target.name()))?
    {
        ctx.target
            .get_document_meta(fingerprint)
            .await
            .with_context(|| format!("Failed to load {} from {}", fingerprint, ctx.target.name()))?
    } else {
        None
    };

    let verdict = decide(ctx.policy, &meta, existing.as_ref());
    if verdict.writes() {
        ctx.target
            .write_document_meta(&meta)
            .await
            .with_context(|| format!("Failed to write {} to {}", fingerprint, ctx.target.name()))?;
        debug!(fingerprint, ?verdict, version = %meta.version, "Wrote document");
        ctx.ledger.record_mutation(fingerprint);
    } else if verdict == Verdict::Conflict {
        debug!(fingerprint, version = %meta.version, "Equal versions on both sides");
        ctx.ledger.record_conflict(fingerprint, file);
    } else {
        debug!(fingerprint, "Target version is authoritative");
    }

    Ok(DocumentOutcome::Resolved(verdict))
}
