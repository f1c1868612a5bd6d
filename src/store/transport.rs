//! Fetching raw file bytes from descriptor urls.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Resolves a [`FileDescriptor`](crate::store::FileDescriptor) url into bytes.
#[async_trait]
pub trait ByteTransport: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: ByteTransport + ?Sized> ByteTransport for std::sync::Arc<T> {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        (**self).fetch_bytes(url).await
    }
}

/// Reads `file://` urls from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    pub const SCHEME: &'static str = "file://";

    /// Build a `file://` url for an absolute path.
    pub fn url_for(path: &Path) -> String {
        format!("{}{}", Self::SCHEME, path.display())
    }

    /// Inverse of [`FileTransport::url_for`].
    pub fn path_for(url: &str) -> Result<PathBuf> {
        match url.strip_prefix(Self::SCHEME) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => bail!("Not a file url: {}", url),
        }
    }
}

#[async_trait]
impl ByteTransport for FileTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let path = Self::path_for(url)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}
