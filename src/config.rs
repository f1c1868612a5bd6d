//! Engine configuration.
//!
//! Loaded from TOML; every key is optional:
//!
//! ```toml
//! concurrency = 10
//! version_policy = "earliest-wins"
//! bandwidth_bytes_per_second = 0
//! timeout_secs = 600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::sync::throttle::BandwidthLimit;
use crate::sync::version::VersionPolicy;

/// Default number of documents synchronized at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Maximum documents in flight.
    pub concurrency: usize,
    /// Which side wins when versions differ.
    pub version_policy: VersionPolicy,
    /// File transfer budget, zero for unlimited.
    pub bandwidth_bytes_per_second: u64,
    /// Deadline for a whole run.
    pub timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            version_policy: VersionPolicy::default(),
            bandwidth_bytes_per_second: 0,
            timeout_secs: None,
        }
    }
}

impl SyncConfig {
    /// Default config file location, `<config dir>/docsync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docsync").join("config.toml"))
    }

    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Load `path`, or the default location if it exists, or defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(SyncError::InvalidConfig(
                "timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn bandwidth_limit(&self) -> BandwidthLimit {
        BandwidthLimit::new(self.bandwidth_bytes_per_second)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Sets the concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the version policy.
    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Sets the bandwidth limit.
    pub fn with_bandwidth_limit(mut self, limit: BandwidthLimit) -> Self {
        self.bandwidth_bytes_per_second = limit.bytes_per_second;
        self
    }

    /// Sets the run deadline, rounded up to whole seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.timeout_secs = Some(secs.max(1));
        self
    }
}
