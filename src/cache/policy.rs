//! Caching rules: keys, storable statuses, `Cache-Control` and validators.

use axum::http::{header, HeaderMap, StatusCode, Uri};
use md5::{Digest, Md5};

use crate::cache::backend::Ttl;

/// Cache key for a request: path followed directly by the raw query.
pub fn cache_key(uri: &Uri) -> String {
    let mut key = uri.path().to_string();
    if let Some(query) = uri.query() {
        key.push_str(query);
    }
    key
}

/// Success and client-error responses are stored; redirects and server errors never are.
pub fn is_cacheable_status(status: StatusCode) -> bool {
    status.is_success() || status.is_client_error()
}

/// Parsed `Cache-Control` response directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: u64,
    pub no_cache: bool,
    pub private: bool,
}

impl CacheControl {
    /// Parse a directive list. Unknown directives are ignored and a malformed
    /// `max-age` reads as zero.
    pub fn parse(value: &str) -> Self {
        let mut directives = CacheControl::default();
        for item in value.split(',').map(str::trim) {
            if let Some((name, arg)) = item.split_once('=') {
                if name.trim().eq_ignore_ascii_case("max-age") {
                    directives.max_age = arg.trim().trim_matches('"').parse().unwrap_or(0);
                }
            } else if item.eq_ignore_ascii_case("no-cache") {
                directives.no_cache = true;
            } else if item.eq_ignore_ascii_case("private") {
                directives.private = true;
            }
        }
        directives
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
    }
}

/// Freshness bounds applied to stored responses.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub default_ttl: Ttl,
    pub max_ttl: Ttl,
}

impl TtlPolicy {
    /// Ttl for a response given its final headers.
    pub fn ttl_for(&self, headers: &HeaderMap) -> Ttl {
        match CacheControl::from_headers(headers) {
            None => self.default_ttl,
            Some(cc) if cc.no_cache => Ttl::Seconds(0),
            Some(cc) => Ttl::Seconds(cc.max_age).min(self.max_ttl),
        }
    }
}

/// Weak validator derived from the body digest: `W/"<hex md5>"`.
pub fn weak_etag(digest: &[u8]) -> String {
    format!("W/\"{}\"", hex::encode(digest))
}

/// Incremental digest feeding [`weak_etag`].
#[derive(Clone, Default)]
pub struct BodyDigest {
    hasher: Md5,
}

impl BodyDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn etag(self) -> String {
        weak_etag(&self.hasher.finalize())
    }
}
