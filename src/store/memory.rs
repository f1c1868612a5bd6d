//! In-memory document store.
//!
//! Used for tests and as a scratch target. Every operation yields to the
//! scheduler once so concurrent units interleave the way they would against
//! a real store.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::store::backend::DocumentStore;
use crate::store::transport::ByteTransport;
use crate::store::types::{
    Backend, DocumentMeta, DocumentMetaRef, FileDescriptor, FileMeta, FileRef,
};

type Blobs = Arc<RwLock<HashMap<String, Vec<u8>>>>;

#[derive(Debug, Clone)]
struct StoredFile {
    url: String,
    meta: FileMeta,
}

/// Write activity observed by a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteCounts {
    /// Metadata writes.
    pub documents: usize,
    /// File writes.
    pub files: usize,
    /// Metadata writes issued while the record's backing file was not in
    /// the stash tier.
    pub orphaned_documents: usize,
}

#[derive(Debug, Default)]
struct Inner {
    documents: BTreeMap<String, DocumentMeta>,
    files: HashMap<(Backend, FileRef), StoredFile>,
    counts: WriteCounts,
    failing: HashSet<String>,
    fail_listing: bool,
}

/// A [`DocumentStore`] held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    inner: Arc<RwLock<Inner>>,
    blobs: Blobs,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Transport that resolves this store's `memory://` urls.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            blobs: Arc::clone(&self.blobs),
        }
    }

    fn url_for(&self, backend: Backend, file: &FileRef) -> String {
        format!("memory://{}/{}/{}", self.name, backend, file)
    }

    /// Seed a metadata record without counting it as a write.
    pub fn insert_document(&self, meta: DocumentMeta) {
        self.inner
            .write()
            .documents
            .insert(meta.fingerprint.clone(), meta);
    }

    /// Seed a file without counting it as a write.
    pub fn insert_file(&self, backend: Backend, file: FileRef, data: Vec<u8>, meta: FileMeta) {
        self.store_file(backend, file, data, meta);
    }

    fn store_file(&self, backend: Backend, file: FileRef, data: Vec<u8>, meta: FileMeta) {
        let url = self.url_for(backend, &file);
        self.blobs.write().insert(url.clone(), data);
        self.inner
            .write()
            .files
            .insert((backend, file), StoredFile { url, meta });
    }

    /// Remove a metadata record, as if deleted upstream.
    pub fn remove_document(&self, fingerprint: &str) -> Option<DocumentMeta> {
        self.inner.write().documents.remove(fingerprint)
    }

    pub fn document(&self, fingerprint: &str) -> Option<DocumentMeta> {
        self.inner.read().documents.get(fingerprint).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.inner.read().documents.len()
    }

    pub fn file_bytes(&self, backend: Backend, file: &FileRef) -> Option<Vec<u8>> {
        let url = self
            .inner
            .read()
            .files
            .get(&(backend, file.clone()))
            .map(|stored| stored.url.clone())?;
        self.blobs.read().get(&url).cloned()
    }

    pub fn file_meta(&self, backend: Backend, file: &FileRef) -> Option<FileMeta> {
        self.inner
            .read()
            .files
            .get(&(backend, file.clone()))
            .map(|stored| stored.meta.clone())
    }

    pub fn write_counts(&self) -> WriteCounts {
        self.inner.read().counts.clone()
    }

    /// Make every read of `fingerprint` fail.
    pub fn fail_document(&self, fingerprint: impl Into<String>) {
        self.inner.write().failing.insert(fingerprint.into());
    }

    /// Make listing the document index fail.
    pub fn fail_listing(&self) {
        self.inner.write().fail_listing = true;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_document_meta_refs(&self) -> Result<Vec<DocumentMetaRef>> {
        tokio::task::yield_now().await;
        let inner = self.inner.read();
        if inner.fail_listing {
            bail!("Store {} is unavailable", self.name);
        }
        Ok(inner
            .documents
            .keys()
            .map(|fingerprint| DocumentMetaRef::new(fingerprint.clone()))
            .collect())
    }

    async fn get_document_meta(&self, fingerprint: &str) -> Result<Option<DocumentMeta>> {
        tokio::task::yield_now().await;
        let inner = self.inner.read();
        if inner.failing.contains(fingerprint) {
            bail!("Failed to read document {} from {}", fingerprint, self.name);
        }
        Ok(inner.documents.get(fingerprint).cloned())
    }

    async fn contains_document_meta(&self, fingerprint: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        Ok(self.inner.read().documents.contains_key(fingerprint))
    }

    async fn write_document_meta(&self, meta: &DocumentMeta) -> Result<()> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.write();
        let orphaned = meta
            .backing_file()
            .is_some_and(|file| !inner.files.contains_key(&(Backend::Stash, file)));
        inner.counts.documents += 1;
        if orphaned {
            inner.counts.orphaned_documents += 1;
        }
        inner.documents.insert(meta.fingerprint.clone(), meta.clone());
        Ok(())
    }

    async fn contains_file(&self, backend: Backend, file: &FileRef) -> Result<bool> {
        tokio::task::yield_now().await;
        Ok(self.inner.read().files.contains_key(&(backend, file.clone())))
    }

    async fn get_file_descriptor(
        &self,
        backend: Backend,
        file: &FileRef,
    ) -> Result<Option<FileDescriptor>> {
        tokio::task::yield_now().await;
        Ok(self
            .inner
            .read()
            .files
            .get(&(backend, file.clone()))
            .map(|stored| FileDescriptor {
                url: stored.url.clone(),
                backend,
                meta: stored.meta.clone(),
            }))
    }

    async fn write_file(
        &self,
        backend: Backend,
        file: &FileRef,
        data: Vec<u8>,
        meta: &FileMeta,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        self.store_file(backend, file.clone(), data, meta.clone());
        self.inner.write().counts.files += 1;
        Ok(())
    }

    fn name(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// Resolves `memory://` urls handed out by a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    blobs: Blobs,
}

#[async_trait]
impl ByteTransport for MemoryTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        tokio::task::yield_now().await;
        self.blobs
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("No blob at {}", url))
    }
}
