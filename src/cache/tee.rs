//! Write-through capture of live response bodies.
//!
//! `TeeBody` wraps the origin's body and is handed to the client in its place.
//! Every data frame is first written to the cache sink, then released to the
//! client. The capture is committed before the last data frame is released,
//! since a server writing a `Content-Length` body stops polling once it has
//! that many bytes. If the body is dropped before that (client went away,
//! upstream error) the sink is dropped with it and the partial value is
//! discarded.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::{Buf, Bytes};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::io::AsyncWrite;

use crate::cache::backend::{CacheSink, Ttl};
use crate::cache::headers::ResponseHeaders;
use crate::cache::middleware::RequestCache;
use crate::cache::policy::BodyDigest;
use crate::observability::metrics;

/// State needed to turn a streamed body into a committed cache entry.
pub(crate) struct Capture {
    pub(crate) cache: Arc<RequestCache>,
    pub(crate) key: String,
    pub(crate) head: ResponseHeaders,
    pub(crate) ttl: Ttl,
    pub(crate) sink: Box<dyn CacheSink>,
    pub(crate) digest: BodyDigest,
    pending: Bytes,
    remaining: Option<u64>,
    finishing: bool,
}

impl Capture {
    pub(crate) fn new(
        cache: Arc<RequestCache>,
        key: String,
        head: ResponseHeaders,
        ttl: Ttl,
        sink: Box<dyn CacheSink>,
    ) -> Self {
        Self {
            cache,
            key,
            head,
            ttl,
            sink,
            digest: BodyDigest::new(),
            pending: Bytes::new(),
            remaining: None,
            finishing: false,
        }
    }

    /// Push buffered bytes into the sink.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while !self.pending.is_empty() {
            match Pin::new(&mut self.sink).poll_write(cx, &self.pending) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(std::io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => self.pending.advance(n),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Response body decorator duplicating data frames into an optional cache sink.
pub struct TeeBody {
    inner: Body,
    held: Option<Frame<Bytes>>,
    capture: Option<Capture>,
    done: bool,
}

impl TeeBody {
    /// A body that forwards `inner` unchanged.
    pub fn passthrough(inner: Body) -> Self {
        Self {
            inner,
            held: None,
            capture: None,
            done: false,
        }
    }

    pub(crate) fn capturing(inner: Body, mut capture: Capture) -> Self {
        capture.remaining = inner.size_hint().exact();
        Self {
            inner,
            held: None,
            capture: Some(capture),
            done: false,
        }
    }

    fn abandon(&mut self, reason: &'static str, error: Option<&dyn std::fmt::Display>) {
        if let Some(capture) = self.capture.take() {
            match error {
                Some(e) => tracing::warn!(key = %capture.key, error = %e, "{}", reason),
                None => tracing::debug!(key = %capture.key, "{}", reason),
            }
            metrics::record_cache_event("discarded");
        }
    }
}

impl HttpBody for TeeBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        loop {
            if let Some(capture) = this.capture.as_mut() {
                match capture.poll_drain(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => this.abandon("Cache write failed", Some(&e)),
                    Poll::Ready(Ok(())) => {}
                }
            }

            if let Some(capture) = this.capture.as_mut() {
                if capture.finishing {
                    match Pin::new(&mut capture.sink).poll_shutdown(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => this.abandon("Cache flush failed", Some(&e)),
                        Poll::Ready(Ok(())) => {
                            if let Some(capture) = this.capture.take() {
                                let cache = capture.cache.clone();
                                cache.complete_capture(capture);
                            }
                        }
                    }
                    continue;
                }
            }

            if let Some(frame) = this.held.take() {
                return Poll::Ready(Some(Ok(frame)));
            }

            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let Some(capture) = this.capture.as_mut() else {
                        return Poll::Ready(Some(Ok(frame)));
                    };
                    match frame.data_ref().cloned() {
                        Some(data) => {
                            capture.digest.update(&data);
                            capture.remaining = capture
                                .remaining
                                .map(|left| left.saturating_sub(data.len() as u64));
                            capture.pending = data;
                            this.held = Some(frame);
                            if capture.remaining == Some(0) || this.inner.is_end_stream() {
                                this.done = true;
                                capture.finishing = true;
                            }
                        }
                        None => return Poll::Ready(Some(Ok(frame))),
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.abandon("Upstream body failed, discarding partial cache value", Some(&e));
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(capture) = this.capture.as_mut() {
                        capture.finishing = true;
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.held.is_none()
            && self.capture.is_none()
            && (self.done || self.inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let hint = self.inner.size_hint();
        let held = match self.held.as_ref().and_then(Frame::data_ref) {
            Some(data) => data.len() as u64,
            // An empty body still has to be polled once to commit its capture.
            None if self.capture.is_some() && hint.exact() == Some(0) => return SizeHint::new(),
            None => return hint,
        };
        if let Some(exact) = hint.exact() {
            return SizeHint::with_exact(exact + held);
        }
        let mut adjusted = SizeHint::new();
        adjusted.set_lower(hint.lower() + held);
        if let Some(upper) = hint.upper() {
            adjusted.set_upper(upper + held);
        }
        adjusted
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        self.abandon("Response body dropped before completion, discarding partial cache value", None);
    }
}
