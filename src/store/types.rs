use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::sync::version::VersionId;

/// Storage tier a file lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Private document files.
    Stash,
    /// Files that may be served publicly.
    Public,
    /// Derived files that can be rebuilt.
    Cache,
}

impl Backend {
    /// Short name used for directory layout and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Stash => "stash",
            Backend::Public => "public",
            Backend::Cache => "cache",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs above this size are hashed on the rayon pool.
const PARALLEL_HASH_MIN: usize = 128 * 1024;

/// Identifies a binary attachment. Only meaningful paired with a [`Backend`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub hashcode: Option<String>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, hashcode: Option<String>) -> Self {
        Self {
            name: name.into(),
            hashcode,
        }
    }

    /// Reference a file by name with a BLAKE3 hashcode (lowercase hex) of
    /// its content.
    pub fn for_content(name: impl Into<String>, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        if data.len() > PARALLEL_HASH_MIN {
            hasher.update_rayon(data);
        } else {
            hasher.update(data);
        }
        Self::new(name, Some(hasher.finalize().to_hex().to_string()))
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hashcode {
            Some(hashcode) => write!(f, "{}#{}", self.name, hashcode),
            None => f.write_str(&self.name),
        }
    }
}

/// Entry in a store's document index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMetaRef {
    pub fingerprint: String,
}

impl DocumentMetaRef {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
        }
    }
}

/// Full metadata record for one logical document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashcode: Option<String>,
    pub version: VersionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl DocumentMeta {
    /// A metadata record with no backing file.
    pub fn new(fingerprint: impl Into<String>, version: VersionId) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            filename: None,
            hashcode: None,
            version,
            title: None,
        }
    }

    /// Attach a backing file.
    pub fn with_file(mut self, file: &FileRef) -> Self {
        self.filename = Some(file.name.clone());
        self.hashcode = file.hashcode.clone();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// The primary file backing this document, if it has one.
    pub fn backing_file(&self) -> Option<FileRef> {
        self.filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| FileRef::new(name, self.hashcode.clone()))
    }
}

/// Opaque file attributes, carried verbatim from source to target.
pub type FileMeta = BTreeMap<String, String>;

/// Where and how a store keeps a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Location understood by a [`ByteTransport`](crate::store::ByteTransport).
    pub url: String,
    /// Tier the file actually lives under.
    pub backend: Backend,
    pub meta: FileMeta,
}
