//! Bandwidth throttling for file copies.
//!
//! One token bucket is shared by every unit of a run, so the limit caps the
//! run's aggregate write rate rather than each file's.

use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Bytes drawn from the bucket per token.
const TOKEN_BYTES: u64 = 1024;

/// Write budget for a run, zero for unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandwidthLimit {
    pub bytes_per_second: u64,
}

impl BandwidthLimit {
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_limited(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// Tokens refilled per second, `None` when unlimited.
    fn tokens_per_second(&self) -> Option<NonZeroU32> {
        if !self.is_limited() {
            return None;
        }
        let tokens = (self.bytes_per_second / TOKEN_BYTES).clamp(1, u64::from(u32::MAX));
        NonZeroU32::new(tokens as u32)
    }
}

impl fmt::Display for BandwidthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_limited() {
            write!(
                f,
                "{}/s",
                humansize::format_size(self.bytes_per_second, humansize::BINARY)
            )
        } else {
            f.write_str("unlimited")
        }
    }
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared token bucket; clones draw from the same budget.
///
/// The bucket holds one second of budget, so a burst never exceeds the
/// configured rate and larger writes are paced in one-second slices.
#[derive(Clone, Default)]
pub struct BandwidthLimiter {
    bucket: Option<Arc<DirectLimiter>>,
    limit: BandwidthLimit,
}

impl BandwidthLimiter {
    pub fn new(limit: BandwidthLimit) -> Self {
        let bucket = limit
            .tokens_per_second()
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        Self { bucket, limit }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn limit(&self) -> BandwidthLimit {
        self.limit
    }

    /// Wait until `bytes` may be written. Returns at once when unlimited.
    pub async fn acquire(&self, bytes: usize) {
        let (Some(bucket), Some(burst)) = (&self.bucket, self.limit.tokens_per_second()) else {
            return;
        };
        if self.try_acquire(bytes) {
            return;
        }

        let mut tokens = (bytes as u64).div_ceil(TOKEN_BYTES).max(1);
        while tokens > 0 {
            let slice = tokens.min(u64::from(burst.get()));
            let Some(n) = NonZeroU32::new(slice as u32) else {
                break;
            };
            // `slice` never exceeds the bucket's burst size
            if bucket.until_n_ready(n).await.is_err() {
                break;
            }
            tokens -= slice;
        }
    }

    /// Take budget for `bytes` only if it is available right now.
    pub fn try_acquire(&self, bytes: usize) -> bool {
        let Some(bucket) = &self.bucket else {
            return true;
        };
        let tokens = (bytes as u64).div_ceil(TOKEN_BYTES).clamp(1, u64::from(u32::MAX));
        match NonZeroU32::new(tokens as u32) {
            Some(n) => matches!(bucket.check_n(n), Ok(Ok(()))),
            None => true,
        }
    }
}

impl fmt::Debug for BandwidthLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandwidthLimiter")
            .field("limit", &self.limit)
            .finish()
    }
}
