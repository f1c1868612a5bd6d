//! Conflict detection between source and target copies of a document.

use crate::store::types::DocumentMeta;
use crate::sync::version::VersionPolicy;

/// What to do with a source record given the target's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Target has no copy; write the source record.
    Create,
    /// Source version is authoritative; overwrite the target's copy.
    Replace,
    /// Target version is authoritative; leave it alone.
    Keep,
    /// Both sides hold the same version identifier. Surfaced to the caller,
    /// never written.
    Conflict,
}

impl Verdict {
    /// Whether the source record must be written to the target.
    pub fn writes(&self) -> bool {
        matches!(self, Self::Create | Self::Replace)
    }
}

/// Decide how a source record relates to the target's copy, if any.
pub fn decide(policy: VersionPolicy, source: &DocumentMeta, target: Option<&DocumentMeta>) -> Verdict {
    let Some(target) = target else {
        return Verdict::Create;
    };

    if source.version == target.version {
        Verdict::Conflict
    } else if policy.source_wins(&source.version, &target.version) {
        Verdict::Replace
    } else {
        Verdict::Keep
    }
}
