use anyhow::Result;
use async_trait::async_trait;

use crate::store::types::{Backend, DocumentMeta, DocumentMetaRef, FileDescriptor, FileMeta, FileRef};

/// Capabilities a document store exposes to the sync engine.
///
/// Source and target of a run are both plain `DocumentStore`s; the engine
/// never assumes anything about how records and files are persisted.
/// Every call may suspend on I/O.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ========== Document metadata ==========

    /// List every document in the store's index.
    async fn list_document_meta_refs(&self) -> Result<Vec<DocumentMetaRef>>;

    /// Load a metadata record, `None` if the store has no such fingerprint.
    async fn get_document_meta(&self, fingerprint: &str) -> Result<Option<DocumentMeta>>;

    /// Check for a metadata record without loading it.
    async fn contains_document_meta(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.get_document_meta(fingerprint).await?.is_some())
    }

    /// Create or replace a metadata record.
    async fn write_document_meta(&self, meta: &DocumentMeta) -> Result<()>;

    // ========== Files ==========

    /// Check for a file. Must not have side effects.
    async fn contains_file(&self, backend: Backend, file: &FileRef) -> Result<bool>;

    /// Locate a file, `None` if the store does not hold it.
    async fn get_file_descriptor(
        &self,
        backend: Backend,
        file: &FileRef,
    ) -> Result<Option<FileDescriptor>>;

    /// Store file bytes and attributes under a tier.
    async fn write_file(
        &self,
        backend: Backend,
        file: &FileRef,
        data: Vec<u8>,
        meta: &FileMeta,
    ) -> Result<()>;

    // ========== Store info ==========

    /// Name for logs and error messages.
    fn name(&self) -> String;
}
