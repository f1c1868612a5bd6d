//! Sync engine for one-way document replication.
//!
//! Enumerates the source's documents, then synchronizes each one as an
//! independent unit on a bounded-concurrency queue: backing file first,
//! then metadata, resolving version conflicts against the target's copy.

use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::backend::DocumentStore;
use crate::store::transport::ByteTransport;
use crate::store::types::DocumentMetaRef;
use crate::sync::progress::{ProgressTracker, SynchronizeListener};
use crate::sync::queue::WorkQueue;
use crate::sync::throttle::BandwidthLimiter;
use crate::sync::transfer::{
    transfer_document, DocumentOutcome, TransferContext, TransferLedger, TransferResult,
};

/// Replicates documents from a source store into a target store.
///
/// The engine holds no state between runs; a run's only effects are target
/// writes and listener calls. Every write is preceded by a containment or
/// version check, so an interrupted run can simply be repeated.
pub struct SyncEngine<T: ByteTransport> {
    transport: T,
    config: SyncConfig,
    limiter: BandwidthLimiter,
}

impl<T: ByteTransport> SyncEngine<T> {
    /// Create an engine that fetches file bytes through `transport`.
    pub fn new(config: SyncConfig, transport: T) -> SyncResult<Self> {
        config.validate()?;
        let limiter = BandwidthLimiter::new(config.bandwidth_limit());
        Ok(Self {
            transport,
            config,
            limiter,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Make `target` contain every document `source` has.
    ///
    /// Fails only when the source's index cannot be listed or the
    /// configured deadline passes. Failures of individual documents are
    /// reported in [`TransferResult::failures`]; the listener still gets
    /// one event per document, so the last event has `completed == total`.
    pub async fn synchronize(
        &self,
        source: &dyn DocumentStore,
        target: &dyn DocumentStore,
        listener: Option<&dyn SynchronizeListener>,
    ) -> SyncResult<TransferResult> {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.run(source, target, listener))
                .await
                .map_err(|_| SyncError::TimedOut(limit))?,
            None => self.run(source, target, listener).await,
        }
    }

    async fn run(
        &self,
        source: &dyn DocumentStore,
        target: &dyn DocumentStore,
        listener: Option<&dyn SynchronizeListener>,
    ) -> SyncResult<TransferResult> {
        info!(
            source = %source.name(),
            target = %target.name(),
            policy = self.config.version_policy.description(),
            bandwidth = %self.limiter.limit(),
            "Starting synchronization"
        );

        let refs = source
            .list_document_meta_refs()
            .await
            .map_err(|e| SyncError::Enumeration {
                store: source.name(),
                source: e,
            })?;
        let refs = unique_refs(refs);

        let ledger = TransferLedger::new(ProgressTracker::start(refs.len()), listener);
        if refs.is_empty() {
            ledger.announce();
            info!("Source is empty, nothing to synchronize");
            return Ok(ledger.finish());
        }

        let ctx = TransferContext {
            source,
            target,
            transport: &self.transport,
            limiter: &self.limiter,
            policy: self.config.version_policy,
            ledger: &ledger,
        };

        // Documents listed but gone by the time their unit ran
        let skipped = AtomicUsize::new(0);
        let mut queue = WorkQueue::new(self.config.concurrency);
        for meta_ref in &refs {
            let ctx = &ctx;
            let skipped = &skipped;
            queue.enqueue(meta_ref.fingerprint.clone(), move || async move {
                let outcome = AssertUnwindSafe(transfer_document(ctx, meta_ref))
                    .catch_unwind()
                    .await;
                // Counted even when the unit failed or panicked
                ctx.ledger.complete();
                match outcome {
                    Ok(Ok(DocumentOutcome::Missing)) => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Ok(Ok(DocumentOutcome::Resolved(_))) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            });
        }

        let report = queue.execute().await;
        let succeeded = report.succeeded();
        ledger.record_failures(report.failures);

        let result = ledger.finish();
        info!(
            documents = refs.len(),
            succeeded,
            skipped = skipped.load(Ordering::Relaxed),
            written = result.mutations.fingerprints.len(),
            files = result.mutations.files.len(),
            conflicts = result.conflicts.fingerprints.len(),
            failures = result.failures.len(),
            bytes = result.bytes_transferred,
            "Synchronization complete"
        );
        Ok(result)
    }
}

/// Synchronize with the default configuration.
pub async fn synchronize<T: ByteTransport>(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    transport: T,
    listener: Option<&dyn SynchronizeListener>,
) -> SyncResult<TransferResult> {
    SyncEngine::new(SyncConfig::default(), transport)?
        .synchronize(source, target, listener)
        .await
}

/// Keep the first occurrence of each fingerprint.
fn unique_refs(refs: Vec<DocumentMetaRef>) -> Vec<DocumentMetaRef> {
    let mut seen = HashSet::with_capacity(refs.len());
    let mut unique = Vec::with_capacity(refs.len());
    for meta_ref in refs {
        if seen.insert(meta_ref.fingerprint.clone()) {
            unique.push(meta_ref);
        } else {
            warn!(fingerprint = %meta_ref.fingerprint, "Duplicate fingerprint in source index");
        }
    }
    unique
}
