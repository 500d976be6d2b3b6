//! Recorded response heads for cached bodies.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use axum::http::{header, HeaderMap, StatusCode};

/// Status and headers recorded alongside a cached body.
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHeaders {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// The stored validator, if any.
    pub fn etag(&self) -> Option<&str> {
        self.headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
    }
}

impl Default for ResponseHeaders {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

/// Map from cache key to the recorded response head.
///
/// Lookups never fail; unknown keys yield `200` with no headers. Records have
/// no ttl of their own and simply follow the body entry by convention.
#[derive(Debug, Default)]
pub struct HeaderStore {
    entries: Mutex<HashMap<String, ResponseHeaders>>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self, key: &str) -> ResponseHeaders {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn store_headers(&self, key: &str, record: ResponseHeaders) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_unknown_key_defaults() {
        let store = HeaderStore::new();
        let record = store.headers("missing");
        assert_eq!(record.status, StatusCode::OK);
        assert!(record.headers.is_empty());
        assert!(record.etag().is_none());
    }

    #[test]
    fn test_store_overwrites() {
        let store = HeaderStore::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::ETAG, HeaderValue::from_static("\"v1\""));
        store.store_headers("k", ResponseHeaders::new(StatusCode::NOT_FOUND, headers));

        let record = store.headers("k");
        assert_eq!(record.status, StatusCode::NOT_FOUND);
        assert_eq!(record.etag(), Some("\"v1\""));

        store.store_headers("k", ResponseHeaders::default());
        assert_eq!(store.headers("k").status, StatusCode::OK);
        assert!(store.headers("k").etag().is_none());
    }
}
