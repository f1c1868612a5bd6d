// Tests for the synchronization engine
// Memory stores on both sides, source transport for file bytes

use anyhow::Result;
use async_trait::async_trait;
use docsync::store::{
    Backend, DocumentMeta, DocumentMetaRef, DocumentStore, FileDescriptor, FileMeta, FileRef,
    MemoryStore, MemoryTransport,
};
use docsync::sync::{synchronize, SyncEngine, SynchronizeEvent, VersionId, VersionPolicy};
use docsync::{SyncConfig, SyncError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

/// Add a document backed by a stash file to `store`.
fn seed_document(store: &MemoryStore, fingerprint: &str, version: &str) -> FileRef {
    let content = format!("content of {}", fingerprint).into_bytes();
    let file = FileRef::for_content(format!("{}.pdf", fingerprint), &content);
    store.insert_file(Backend::Stash, file.clone(), content, FileMeta::new());
    store.insert_document(DocumentMeta::new(fingerprint, VersionId::new(version)).with_file(&file));
    file
}

fn engine(store: &MemoryStore, config: SyncConfig) -> SyncEngine<MemoryTransport> {
    SyncEngine::new(config, store.transport()).unwrap()
}

/// Memory store whose answers can be skewed per test.
#[derive(Default)]
struct ScriptedStore {
    inner: Option<MemoryStore>,
    /// Listed but never loadable.
    ghost: Option<String>,
    /// Every fingerprint listed twice.
    duplicate: bool,
    /// Tier reported by file descriptors.
    redirect: Option<Backend>,
    /// Panics while loading this fingerprint.
    panic_on: Option<String>,
    /// Delay before every record load.
    stall: Option<Duration>,
}

impl ScriptedStore {
    fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner: Some(inner),
            ..Default::default()
        }
    }

    fn inner(&self) -> &MemoryStore {
        self.inner.as_ref().unwrap()
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn list_document_meta_refs(&self) -> Result<Vec<DocumentMetaRef>> {
        let mut refs = self.inner().list_document_meta_refs().await?;
        if self.duplicate {
            let copy = refs.clone();
            refs.extend(copy);
        }
        if let Some(ghost) = &self.ghost {
            refs.push(DocumentMetaRef::new(ghost.clone()));
        }
        Ok(refs)
    }

    async fn get_document_meta(&self, fingerprint: &str) -> Result<Option<DocumentMeta>> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.panic_on.as_deref() == Some(fingerprint) {
            panic!("corrupt record {}", fingerprint);
        }
        self.inner().get_document_meta(fingerprint).await
    }

    async fn write_document_meta(&self, meta: &DocumentMeta) -> Result<()> {
        self.inner().write_document_meta(meta).await
    }

    async fn contains_file(&self, backend: Backend, file: &FileRef) -> Result<bool> {
        self.inner().contains_file(backend, file).await
    }

    async fn get_file_descriptor(
        &self,
        backend: Backend,
        file: &FileRef,
    ) -> Result<Option<FileDescriptor>> {
        let descriptor = self.inner().get_file_descriptor(backend, file).await?;
        Ok(descriptor.map(|mut descriptor| {
            if let Some(redirect) = self.redirect {
                descriptor.backend = redirect;
            }
            descriptor
        }))
    }

    async fn write_file(
        &self,
        backend: Backend,
        file: &FileRef,
        data: Vec<u8>,
        meta: &FileMeta,
    ) -> Result<()> {
        self.inner().write_file(backend, file, data, meta).await
    }

    fn name(&self) -> String {
        format!("scripted:{}", self.inner().name())
    }
}

#[tokio::test]
async fn test_three_documents_into_empty_target() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    for fingerprint in ["f1", "f2", "f3"] {
        seed_document(&source, fingerprint, "0001");
    }

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let result = synchronize(&source, &target, source.transport(), Some(&listener))
        .await
        .unwrap();

    assert_eq!(result.mutations.fingerprints.len(), 3);
    assert_eq!(result.mutations.files.len(), 3);
    assert!(result.conflicts.is_empty());
    assert!(result.failures.is_empty());

    let events = events.into_inner();
    assert_eq!(events.len(), 3);
    let last = events.last().unwrap();
    assert_eq!((last.completed, last.total, last.progress), (3, 3, 100));
    assert!(last.is_final());
}

#[tokio::test]
async fn test_empty_source_emits_single_event() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let result = synchronize(&source, &target, source.transport(), Some(&listener))
        .await
        .unwrap();

    assert!(result.mutations.is_empty());
    assert!(result.conflicts.is_empty());
    let events = events.into_inner();
    assert_eq!(events.len(), 1);
    assert_eq!(
        (events[0].completed, events[0].total, events[0].progress),
        (0, 0, 100)
    );
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    for i in 0..5 {
        seed_document(&source, &format!("doc-{}", i), "0001");
    }

    let first = synchronize(&source, &target, source.transport(), None).await.unwrap();
    assert_eq!(first.mutations.fingerprints.len(), 5);
    assert!(first.bytes_transferred > 0);

    let second = synchronize(&source, &target, source.transport(), None).await.unwrap();
    assert!(second.mutations.is_empty());
    assert_eq!(second.bytes_transferred, 0);
    // Same versions on both sides now
    assert_eq!(second.conflicts.fingerprints.len(), 5);

    let counts = target.write_counts();
    assert_eq!((counts.documents, counts.files), (5, 5));
}

#[tokio::test]
async fn test_completeness_and_file_before_metadata() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    let mut files = Vec::new();
    for i in 0..40 {
        files.push(seed_document(&source, &format!("doc-{:02}", i), "0001"));
    }

    let engine = engine(&source, SyncConfig::default().with_concurrency(8));
    let result = engine.synchronize(&source, &target, None).await.unwrap();

    assert_eq!(target.document_count(), 40);
    let written: HashSet<_> = result.mutations.fingerprints.iter().cloned().collect();
    for i in 0..40 {
        assert!(written.contains(&format!("doc-{:02}", i)));
    }
    for file in &files {
        assert!(target.contains_file(Backend::Stash, file).await.unwrap());
    }
    assert_eq!(target.write_counts().orphaned_documents, 0);
}

#[tokio::test]
async fn test_equal_versions_are_a_conflict() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    let file = seed_document(&source, "f1", "0005");
    target.insert_document(
        DocumentMeta::new("f1", VersionId::new("0005"))
            .with_file(&file)
            .with_title("target copy"),
    );

    let result = synchronize(&source, &target, source.transport(), None).await.unwrap();

    assert_eq!(result.conflicts.fingerprints, vec!["f1".to_string()]);
    assert_eq!(result.conflicts.files, vec![file]);
    assert!(result.mutations.fingerprints.is_empty());
    assert_eq!(
        target.document("f1").unwrap().title.as_deref(),
        Some("target copy")
    );
}

#[tokio::test]
async fn test_earlier_source_version_replaces_target() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    seed_document(&source, "older", "0001");
    seed_document(&target, "older", "0002");
    seed_document(&source, "newer", "0009");
    seed_document(&target, "newer", "0003");

    let result = synchronize(&source, &target, source.transport(), None).await.unwrap();

    assert_eq!(result.mutations.fingerprints, vec!["older".to_string()]);
    assert!(result.conflicts.is_empty());
    assert_eq!(target.document("older").unwrap().version, VersionId::new("0001"));
    assert_eq!(target.document("newer").unwrap().version, VersionId::new("0003"));
}

#[tokio::test]
async fn test_latest_wins_policy() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    seed_document(&source, "older", "0001");
    seed_document(&target, "older", "0002");
    seed_document(&source, "newer", "0009");
    seed_document(&target, "newer", "0003");

    let engine = engine(
        &source,
        SyncConfig::default().with_version_policy(VersionPolicy::LatestWins),
    );
    let result = engine.synchronize(&source, &target, None).await.unwrap();

    assert_eq!(result.mutations.fingerprints, vec!["newer".to_string()]);
    assert_eq!(target.document("older").unwrap().version, VersionId::new("0002"));
    assert_eq!(target.document("newer").unwrap().version, VersionId::new("0009"));
}

#[tokio::test]
async fn test_mutations_and_conflicts_are_exclusive() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    for i in 0..30 {
        let fingerprint = format!("doc-{}", i);
        seed_document(&source, &fingerprint, &format!("{:04}", i % 3));
        if i % 2 == 0 {
            seed_document(&target, &fingerprint, "0001");
        }
    }

    let engine = engine(&source, SyncConfig::default().with_concurrency(4));
    let result = engine.synchronize(&source, &target, None).await.unwrap();

    let mutated: HashSet<_> = result.mutations.fingerprints.iter().collect();
    let conflicted: HashSet<_> = result.conflicts.fingerprints.iter().collect();
    assert!(mutated.is_disjoint(&conflicted));
    assert!(!conflicted.is_empty());
    assert_eq!(mutated.len(), result.mutations.fingerprints.len());
}

#[tokio::test]
async fn test_document_without_file() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    source.insert_document(DocumentMeta::new("bare", VersionId::new("0001")).with_title("notes"));

    let result = synchronize(&source, &target, source.transport(), None).await.unwrap();

    assert_eq!(result.mutations.fingerprints, vec!["bare".to_string()]);
    assert!(result.mutations.files.is_empty());
    assert_eq!(target.write_counts().files, 0);
    assert_eq!(target.document("bare").unwrap().title.as_deref(), Some("notes"));
}

#[tokio::test]
async fn test_missing_source_file_still_writes_metadata() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    let file = FileRef::new("lost.pdf", Some("deadbeef".into()));
    source.insert_document(DocumentMeta::new("f1", VersionId::new("0001")).with_file(&file));

    let result = synchronize(&source, &target, source.transport(), None).await.unwrap();

    assert_eq!(result.mutations.fingerprints, vec!["f1".to_string()]);
    assert!(result.mutations.files.is_empty());
    assert!(result.failures.is_empty());
}

#[tokio::test]
async fn test_shared_file_is_written_once() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    let shared = seed_document(&source, "first", "0001");
    for i in 0..10 {
        source.insert_document(
            DocumentMeta::new(format!("copy-{}", i), VersionId::new("0001")).with_file(&shared),
        );
    }

    let engine = engine(&source, SyncConfig::default().with_concurrency(6));
    let result = engine.synchronize(&source, &target, None).await.unwrap();

    assert_eq!(result.mutations.fingerprints.len(), 11);
    assert_eq!(result.mutations.files, vec![shared]);
    let counts = target.write_counts();
    assert_eq!(counts.files, 1);
    assert_eq!(counts.orphaned_documents, 0);
}

#[tokio::test]
async fn test_unit_failure_is_isolated() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    for fingerprint in ["a", "b", "c", "d"] {
        seed_document(&source, fingerprint, "0001");
    }
    source.fail_document("c");

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let engine = engine(&source, SyncConfig::default().with_concurrency(2));
    let result = engine
        .synchronize(&source, &target, Some(&listener))
        .await
        .unwrap();

    assert_eq!(result.mutations.fingerprints.len(), 3);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].label, "c");
    assert!(target.document("c").is_none());

    // Progress still reaches the total
    let events = events.into_inner();
    assert_eq!(events.len(), 4);
    assert_eq!(events.last().unwrap().completed, 4);
}

#[tokio::test]
async fn test_unit_panic_is_isolated() {
    let inner = MemoryStore::new("src");
    for fingerprint in ["a", "b", "c"] {
        seed_document(&inner, fingerprint, "0001");
    }
    let source = ScriptedStore {
        panic_on: Some("b".into()),
        ..ScriptedStore::wrap(inner.clone())
    };
    let target = MemoryStore::new("dst");

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let result = synchronize(&source, &target, inner.transport(), Some(&listener))
        .await
        .unwrap();

    assert_eq!(result.mutations.fingerprints.len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].label, "b");
    assert!(result.failures[0].error.contains("corrupt record b"));
    assert_eq!(events.into_inner().last().unwrap().completed, 3);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    for i in 0..25 {
        seed_document(&source, &format!("doc-{}", i), "0001");
    }

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let engine = engine(&source, SyncConfig::default().with_concurrency(5));
    engine
        .synchronize(&source, &target, Some(&listener))
        .await
        .unwrap();

    let events = events.into_inner();
    assert_eq!(events.len(), 25);
    for pair in events.windows(2) {
        assert!(pair[0].completed < pair[1].completed);
        assert!(pair[0].progress <= pair[1].progress);
        assert!(pair[0].duration <= pair[1].duration);
    }
    assert!(events.iter().all(|e| e.total == 25 && e.progress <= 100));
    assert_eq!(events.last().unwrap().progress, 100);
}

#[tokio::test]
async fn test_document_removed_after_listing_is_skipped() {
    let inner = MemoryStore::new("src");
    seed_document(&inner, "kept", "0001");
    let source = ScriptedStore {
        ghost: Some("deleted".into()),
        ..ScriptedStore::wrap(inner.clone())
    };
    let target = MemoryStore::new("dst");

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let result = synchronize(&source, &target, inner.transport(), Some(&listener))
        .await
        .unwrap();

    assert_eq!(result.mutations.fingerprints, vec!["kept".to_string()]);
    assert!(result.conflicts.is_empty());
    assert!(result.failures.is_empty());
    let last = *events.into_inner().last().unwrap();
    assert_eq!((last.completed, last.total), (2, 2));
}

#[tokio::test]
async fn test_duplicate_listing_counts_once() {
    let inner = MemoryStore::new("src");
    seed_document(&inner, "a", "0001");
    seed_document(&inner, "b", "0001");
    let source = ScriptedStore {
        duplicate: true,
        ..ScriptedStore::wrap(inner.clone())
    };
    let target = MemoryStore::new("dst");

    let events = Mutex::new(Vec::new());
    let listener = |event: SynchronizeEvent| events.lock().push(event);
    let result = synchronize(&source, &target, inner.transport(), Some(&listener))
        .await
        .unwrap();

    assert_eq!(result.mutations.fingerprints.len(), 2);
    assert_eq!(target.write_counts().documents, 2);
    let events = events.into_inner();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.total == 2));
}

#[tokio::test]
async fn test_file_written_under_descriptor_backend() {
    let inner = MemoryStore::new("src");
    let file = seed_document(&inner, "f1", "0001");
    let source = ScriptedStore {
        redirect: Some(Backend::Public),
        ..ScriptedStore::wrap(inner.clone())
    };
    let target = MemoryStore::new("dst");

    let result = synchronize(&source, &target, inner.transport(), None)
        .await
        .unwrap();

    assert_eq!(result.mutations.files, vec![file.clone()]);
    assert!(target.file_bytes(Backend::Public, &file).is_some());
    assert!(target.file_bytes(Backend::Stash, &file).is_none());
}

#[tokio::test]
async fn test_run_deadline() {
    let inner = MemoryStore::new("src");
    seed_document(&inner, "slow", "0001");
    let source = ScriptedStore {
        stall: Some(Duration::from_secs(30)),
        ..ScriptedStore::wrap(inner.clone())
    };
    let target = MemoryStore::new("dst");

    let engine = SyncEngine::new(
        SyncConfig::default().with_timeout(Duration::from_secs(1)),
        inner.transport(),
    )
    .unwrap();
    let err = engine.synchronize(&source, &target, None).await.unwrap_err();

    assert!(matches!(err, SyncError::TimedOut(limit) if limit == Duration::from_secs(1)));
    assert!(err.is_retryable());
    assert_eq!(target.document_count(), 0);
}

#[tokio::test]
async fn test_enumeration_failure_returns_no_result() {
    let source = MemoryStore::new("src");
    let target = MemoryStore::new("dst");
    seed_document(&source, "f1", "0001");
    source.fail_listing();

    let err = synchronize(&source, &target, source.transport(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Enumeration { .. }));
    assert_eq!(target.document_count(), 0);
}
