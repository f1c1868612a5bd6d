use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::store::backend::DocumentStore;
use crate::store::transport::FileTransport;
use crate::store::types::{
    Backend, DocumentMeta, DocumentMetaRef, FileDescriptor, FileMeta, FileRef,
};

const DOCS_DIR: &str = "docs";
const STATE_FILE: &str = "state.json";
const SIDECAR_SUFFIX: &str = ".meta.json";
/// Hash directory for files stored without a hashcode.
const UNHASHED_DIR: &str = "_";

/// Sidecar written next to every stored file.
#[derive(Debug, Serialize, Deserialize)]
struct FileSidecar {
    hashcode: Option<String>,
    #[serde(default)]
    meta: FileMeta,
}

/// A [`DocumentStore`] rooted in a local directory.
///
/// ```text
/// <root>/docs/<fingerprint>/state.json
/// <root>/<backend>/<hashcode>/<name>
/// <root>/<backend>/<hashcode>/<name>.meta.json
/// ```
///
/// Files without a hashcode live under `_` in place of `<hashcode>`, so
/// every distinct [`FileRef`] has its own path.
///
/// Descriptor urls are `file://` urls, resolved by [`FileTransport`].
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a store, creating the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create store root: {}", root.display()))?;
        let root = tokio::fs::canonicalize(&root)
            .await
            .with_context(|| format!("Failed to resolve store root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, fingerprint: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(DOCS_DIR)
            .join(check_component(fingerprint)?)
            .join(STATE_FILE))
    }

    fn file_path(&self, backend: Backend, file: &FileRef) -> Result<PathBuf> {
        let hash_dir = match file.hashcode.as_deref() {
            Some(UNHASHED_DIR) => bail!("Invalid hashcode for {}: {:?}", file.name, UNHASHED_DIR),
            Some(hashcode) => check_component(hashcode)?,
            None => UNHASHED_DIR,
        };
        Ok(self
            .root
            .join(backend.as_str())
            .join(hash_dir)
            .join(check_component(&file.name)?))
    }

    /// Sidecar of a stored file, if the file is present with a matching hashcode.
    async fn stored_file(
        &self,
        backend: Backend,
        file: &FileRef,
    ) -> Result<Option<(PathBuf, FileSidecar)>> {
        let path = self.file_path(backend, file)?;
        let Some(sidecar) = read_json::<FileSidecar>(&sidecar_path(&path)).await? else {
            return Ok(None);
        };
        if sidecar.hashcode != file.hashcode || !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some((path, sidecar)))
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn list_document_meta_refs(&self) -> Result<Vec<DocumentMetaRef>> {
        let docs = self.root.join(DOCS_DIR);
        let mut read_dir = match tokio::fs::read_dir(&docs).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read directory: {}", docs.display()))
            }
        };

        let mut refs = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden entries and anything still being written
            if name.starts_with('.') {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(STATE_FILE)).await? {
                refs.push(DocumentMetaRef::new(name));
            }
        }

        refs.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(refs)
    }

    async fn get_document_meta(&self, fingerprint: &str) -> Result<Option<DocumentMeta>> {
        read_json(&self.state_path(fingerprint)?).await
    }

    async fn contains_document_meta(&self, fingerprint: &str) -> Result<bool> {
        let path = self.state_path(fingerprint)?;
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }

    async fn write_document_meta(&self, meta: &DocumentMeta) -> Result<()> {
        let path = self.state_path(&meta.fingerprint)?;
        let data = serde_json::to_vec_pretty(meta)?;
        write_atomic(&path, &data).await
    }

    async fn contains_file(&self, backend: Backend, file: &FileRef) -> Result<bool> {
        Ok(self.stored_file(backend, file).await?.is_some())
    }

    async fn get_file_descriptor(
        &self,
        backend: Backend,
        file: &FileRef,
    ) -> Result<Option<FileDescriptor>> {
        Ok(self
            .stored_file(backend, file)
            .await?
            .map(|(path, sidecar)| FileDescriptor {
                url: FileTransport::url_for(&path),
                backend,
                meta: sidecar.meta,
            }))
    }

    async fn write_file(
        &self,
        backend: Backend,
        file: &FileRef,
        data: Vec<u8>,
        meta: &FileMeta,
    ) -> Result<()> {
        let path = self.file_path(backend, file)?;
        write_atomic(&path, &data).await?;

        // The sidecar goes last: a file only counts as present once it exists
        let sidecar = FileSidecar {
            hashcode: file.hashcode.clone(),
            meta: meta.clone(),
        };
        write_atomic(&sidecar_path(&path), &serde_json::to_vec_pretty(&sidecar)?).await
    }

    fn name(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

/// Reject names that would escape their directory or be taken for
/// hidden in-progress entries.
fn check_component(name: &str) -> Result<&str> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.ends_with(SIDECAR_SUFFIX)
    {
        bail!("Invalid store name: {:?}", name);
    }
    Ok(name)
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(SIDECAR_SUFFIX);
    path.with_file_name(name)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write through a hidden temp file and rename into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(path.file_name().unwrap_or_default());
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::now_v7().simple()));
    let tmp = parent.join(tmp_name);

    tokio::fs::write(&tmp, data)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
