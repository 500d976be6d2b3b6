//! Cache backend capability.
//!
//! # Responsibilities
//! - Define the storage contract consumed by the caching middleware
//! - Model entry lifetime (ttl + creation instant)
//!
//! # Design Decisions
//! - Values are streamed in and out (`AsyncWrite` / `AsyncRead`), never
//!   buffered whole by the caller
//! - A new value becomes visible only when its sink is committed; a sink that
//!   is dropped early discards what it received
//! - Implementations guard their key map with one short-held lock and perform
//!   byte I/O outside of it

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Stream over a stored value. Dropping it closes the underlying storage handle.
pub type CacheReader = Box<dyn AsyncRead + Send + Unpin>;

/// Pending result of opening a value for reading or writing.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Errors produced by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key was never committed.
    #[error("value not found")]
    NotFound,

    /// The key exists but its ttl has elapsed.
    #[error("value has expired")]
    Expired,

    /// Storage medium failure.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// True for the errors that simply mean "go to the origin".
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::NotFound | CacheError::Expired)
    }
}

/// Time-to-live of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Never expires.
    Forever,
    /// Expires this many seconds after the entry's creation instant.
    /// Zero means the entry is stale as soon as it is written.
    Seconds(u64),
}

impl Ttl {
    /// Interpret a signed second count: negative values mean forever.
    pub fn from_secs(secs: i64) -> Self {
        if secs < 0 {
            Ttl::Forever
        } else {
            Ttl::Seconds(secs as u64)
        }
    }

    /// The smaller of two ttls, `Forever` being the largest.
    pub fn min(self, other: Ttl) -> Ttl {
        match (self, other) {
            (Ttl::Forever, t) | (t, Ttl::Forever) => t,
            (Ttl::Seconds(a), Ttl::Seconds(b)) => Ttl::Seconds(a.min(b)),
        }
    }
}

/// Lifetime bookkeeping shared by all backends.
#[derive(Debug, Clone, Copy)]
pub struct EntryMeta {
    pub ttl: Ttl,
    pub created_at: Instant,
}

impl EntryMeta {
    /// Metadata for a freshly committed value.
    pub fn new() -> Self {
        Self {
            ttl: Ttl::Forever,
            created_at: Instant::now(),
        }
    }

    /// True while the entry may be served without consulting the origin.
    pub fn is_fresh(&self) -> bool {
        match self.ttl {
            Ttl::Forever => true,
            Ttl::Seconds(secs) => self.created_at.elapsed() < Duration::from_secs(secs),
        }
    }

    pub fn expire(&mut self, ttl: Ttl) {
        self.ttl = ttl;
        self.created_at = Instant::now();
    }

    pub fn refresh(&mut self) {
        self.created_at = Instant::now();
    }
}

impl Default for EntryMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side of a new cache value.
///
/// Bytes written are staged; `commit` publishes them as the entry for the key,
/// replacing any previous value, with ttl `Forever` until `expire` is called.
/// Dropping the sink without committing discards the staged bytes.
pub trait CacheSink: AsyncWrite + Send + Unpin {
    /// Publish the staged value. Callers flush/shut down the writer first.
    fn commit(self: Box<Self>) -> Result<(), CacheError>;
}

/// Storage engine for cached response bodies.
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    /// Open a sink for a new value of `key`.
    fn input<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Box<dyn CacheSink>>;

    /// Read the value of `key` if present and not expired.
    fn output<'a>(&'a self, key: &'a str) -> CacheFuture<'a, CacheReader>;

    /// Read the value of `key` regardless of its ttl.
    fn output_last_good_copy<'a>(&'a self, key: &'a str) -> CacheFuture<'a, CacheReader>;

    /// Set the ttl of `key`, measured from now. No-op for absent keys.
    fn expire(&self, key: &str, ttl: Ttl);

    /// Restart the ttl clock of `key`. No-op for absent keys.
    fn refresh(&self, key: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_from_secs() {
        assert_eq!(Ttl::from_secs(-1), Ttl::Forever);
        assert_eq!(Ttl::from_secs(0), Ttl::Seconds(0));
        assert_eq!(Ttl::from_secs(30), Ttl::Seconds(30));
    }

    #[test]
    fn test_ttl_min() {
        assert_eq!(Ttl::Forever.min(Ttl::Seconds(5)), Ttl::Seconds(5));
        assert_eq!(Ttl::Seconds(5).min(Ttl::Forever), Ttl::Seconds(5));
        assert_eq!(Ttl::Seconds(5).min(Ttl::Seconds(3)), Ttl::Seconds(3));
        assert_eq!(Ttl::Forever.min(Ttl::Forever), Ttl::Forever);
    }

    #[test]
    fn test_meta_freshness() {
        let mut meta = EntryMeta::new();
        assert!(meta.is_fresh());

        meta.expire(Ttl::Seconds(0));
        assert!(!meta.is_fresh());

        meta.expire(Ttl::Seconds(60));
        assert!(meta.is_fresh());

        meta.created_at = Instant::now() - Duration::from_secs(61);
        assert!(!meta.is_fresh());
        meta.refresh();
        assert!(meta.is_fresh());
    }
}
