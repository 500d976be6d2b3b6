//! Response caching middleware.
//!
//! # Request Flow
//! ```text
//! GET request
//!     → key = path + raw query
//!     → output(key) fresh?
//!         yes → If-None-Match == stored ETag ? 304 : stored head + cached body
//!         no  → forward (stored ETag as If-None-Match)
//!               → 304          → refresh(key), serve last good copy
//!               → 5xx          → serve last good copy, else 500
//!               → 2xx / 4xx    → tee body into input(key), record head, expire(key, ttl)
//!               → anything else → pass through
//! ```
//!
//! Concurrent misses on one key each go to the origin; the last sink to
//! commit wins.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use crate::cache::backend::{CacheBackend, CacheReader};
use crate::cache::headers::{HeaderStore, ResponseHeaders};
use crate::cache::policy::{cache_key, is_cacheable_status, CacheControl, TtlPolicy};
use crate::cache::tee::{Capture, TeeBody};
use crate::observability::metrics;

/// Response header reporting how the cache handled a request.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state of the caching middleware.
#[derive(Debug)]
pub struct RequestCache {
    backend: Arc<dyn CacheBackend>,
    headers: HeaderStore,
    policy: TtlPolicy,
}

impl RequestCache {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: TtlPolicy) -> Self {
        Self {
            backend,
            headers: HeaderStore::new(),
            policy,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn header_store(&self) -> &HeaderStore {
        &self.headers
    }

    /// Run one request through the cache.
    pub async fn handle(self: &Arc<Self>, mut request: Request, next: Next) -> Response {
        if request.method() != Method::GET {
            return next.run(request).await;
        }

        let key = cache_key(request.uri());
        let record = self.headers.headers(&key);
        let client_validator = request.headers_mut().remove(header::IF_NONE_MATCH);

        match self.backend.output(&key).await {
            Ok(reader) => {
                tracing::debug!(key = %key, "Cache hit");
                metrics::record_cache_event("hit");
                return respond_from_cache(record, reader, client_validator.as_ref(), "HIT");
            }
            Err(e) if e.is_miss() => {
                tracing::debug!(key = %key, reason = %e, "Cache miss");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            }
        }
        metrics::record_cache_event("miss");

        // Revalidate our own copy when we have a validator for it; otherwise
        // let the client's validator reach the origin untouched.
        let stored_validator = record
            .etag()
            .and_then(|etag| HeaderValue::from_str(etag).ok());
        let revalidating = stored_validator.is_some();
        if let Some(validator) = stored_validator.or_else(|| client_validator.clone()) {
            request.headers_mut().insert(header::IF_NONE_MATCH, validator);
        }

        let response = next.run(request).await;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED && revalidating {
            tracing::debug!(key = %key, "Origin confirmed cached copy");
            self.backend.refresh(&key);
            metrics::record_cache_event("revalidated");
            return self
                .serve_last_good_copy(&key, record, client_validator.as_ref(), "REVALIDATED")
                .await;
        }

        if status.is_server_error() {
            tracing::warn!(key = %key, status = %status, "Origin failed, trying last good copy");
            return self
                .serve_last_good_copy(&key, record, client_validator.as_ref(), "STALE")
                .await;
        }

        if !is_cacheable_status(status) {
            return labelled(response, "MISS");
        }

        let (mut parts, body) = response.into_parts();
        if CacheControl::from_headers(&parts.headers).is_some_and(|cc| cc.private) {
            tracing::debug!(key = %key, "Private response, not storing");
            parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
            return Response::from_parts(parts, body);
        }

        let ttl = self.policy.ttl_for(&parts.headers);
        let body = match self.backend.input(&key).await {
            Ok(sink) => {
                let head = ResponseHeaders::new(status, storable_headers(&parts.headers));
                let capture = Capture::new(self.clone(), key, head, ttl, sink);
                Body::new(TeeBody::capturing(body, capture))
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not open cache entry, serving uncached");
                body
            }
        };

        parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        Response::from_parts(parts, body)
    }

    /// Record the head and publish the body of a fully streamed response.
    pub(crate) fn complete_capture(&self, capture: Capture) {
        let Capture {
            key,
            mut head,
            ttl,
            sink,
            digest,
            ..
        } = capture;

        if !head.headers.contains_key(header::ETAG) {
            if let Ok(etag) = HeaderValue::from_str(&digest.etag()) {
                head.headers.insert(header::ETAG, etag);
            }
        }

        if let Err(e) = sink.commit() {
            tracing::warn!(key = %key, error = %e, "Failed to commit cache entry");
            return;
        }
        self.headers.store_headers(&key, head);
        self.backend.expire(&key, ttl);

        tracing::debug!(key = %key, ttl = ?ttl, "Response cached");
        metrics::record_cache_event("stored");
    }

    async fn serve_last_good_copy(
        &self,
        key: &str,
        record: ResponseHeaders,
        client_validator: Option<&HeaderValue>,
        label: &'static str,
    ) -> Response {
        match self.backend.output_last_good_copy(key).await {
            Ok(reader) => {
                if label == "STALE" {
                    metrics::record_cache_event("stale");
                }
                respond_from_cache(record, reader, client_validator, label)
            }
            Err(e) => {
                if !e.is_miss() {
                    tracing::warn!(key = %key, error = %e, "Last good copy unreadable");
                }
                tracing::warn!(key = %key, "No cached copy to fall back on");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

/// Axum middleware entry point.
pub async fn cache_middleware(
    State(cache): State<Arc<RequestCache>>,
    request: Request,
    next: Next,
) -> Response {
    cache.handle(request, next).await
}

fn respond_from_cache(
    record: ResponseHeaders,
    reader: CacheReader,
    client_validator: Option<&HeaderValue>,
    label: &'static str,
) -> Response {
    let not_modified = matches!(
        (client_validator, record.etag()),
        (Some(given), Some(stored)) if given.as_bytes() == stored.as_bytes()
    );

    let (status, body) = if not_modified {
        drop(reader);
        (StatusCode::NOT_MODIFIED, Body::empty())
    } else {
        (record.status, Body::from_stream(ReaderStream::new(reader)))
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = record.headers;
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(label));
    response
}

fn labelled(mut response: Response, label: &'static str) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(label));
    response
}

/// Headers worth replaying with a cached body. Framing headers are dropped
/// since the head and body are stored separately and may briefly disagree.
fn storable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut stored = headers.clone();
    stored.remove(header::CONTENT_LENGTH);
    stored.remove(header::TRANSFER_ENCODING);
    stored.remove(X_CACHE);
    stored
}
