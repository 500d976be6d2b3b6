//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request
//!     → middleware.rs (lookup, conditional GET, stale fallback)
//!     → backend.rs (capability trait)
//!         → memory.rs | disk.rs (body storage)
//!     → headers.rs (recorded status + headers)
//!     → tee.rs (stream live body to client and sink together)
//!     → policy.rs (cache key, TTL from Cache-Control, ETag)
//! ```
//!
//! # Design Decisions
//! - Body storage and header records have independent lifecycles
//! - Storage is pluggable behind `Arc<dyn CacheBackend>`
//! - Nothing here is global; one `RequestCache` is built per server

pub mod backend;
pub mod disk;
pub mod headers;
pub mod memory;
pub mod middleware;
pub mod policy;
pub mod tee;

use std::sync::Arc;

pub use backend::{CacheBackend, CacheError, CacheFuture, CacheReader, CacheSink, Ttl};
pub use disk::DiskCache;
pub use headers::{HeaderStore, ResponseHeaders};
pub use memory::MemoryCache;
pub use middleware::{cache_middleware, RequestCache, X_CACHE};
pub use policy::TtlPolicy;

use crate::config::{CacheBackendKind, CacheConfig};

/// Build the caching middleware state described by `config`.
pub fn build_request_cache(config: &CacheConfig) -> Result<RequestCache, CacheError> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
        CacheBackendKind::Disk => Arc::new(DiskCache::new(&config.directory)?),
    };
    let policy = TtlPolicy {
        default_ttl: Ttl::from_secs(config.default_ttl_secs),
        max_ttl: Ttl::from_secs(config.max_ttl_secs),
    };

    tracing::info!(
        backend = ?config.backend,
        default_ttl = ?policy.default_ttl,
        max_ttl = ?policy.max_ttl,
        "Response cache enabled"
    );
    Ok(RequestCache::new(backend, policy))
}
