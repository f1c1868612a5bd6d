//! Version identifiers and their total order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Totally ordered token attached to a metadata record.
///
/// Ordering is plain lexicographic comparison of the identifier text, so
/// identifiers minted by [`VersionId::generate`] (hyphenated UUIDv7) sort by
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Which of two differing versions is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionPolicy {
    /// The version that sorts first wins.
    #[default]
    EarliestWins,
    /// The version that sorts last wins.
    LatestWins,
}

impl VersionPolicy {
    /// Get a human-readable description of the policy.
    pub fn description(&self) -> &'static str {
        match self {
            Self::EarliestWins => "Lower version identifier is authoritative",
            Self::LatestWins => "Higher version identifier is authoritative",
        }
    }

    /// Whether a source at `source` should replace a target at `target`.
    ///
    /// Equal versions never replace; see [`crate::sync::conflict::decide`].
    pub fn source_wins(&self, source: &VersionId, target: &VersionId) -> bool {
        match (self, source.cmp(target)) {
            (Self::EarliestWins, Ordering::Less) => true,
            (Self::LatestWins, Ordering::Greater) => true,
            _ => false,
        }
    }
}
