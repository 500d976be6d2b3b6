//! In-memory cache backend.

use std::collections::HashMap;
use std::future::ready;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWrite;

use crate::cache::backend::{
    CacheBackend, CacheError, CacheFuture, CacheReader, CacheSink, EntryMeta, Ttl,
};

#[derive(Debug)]
struct MemoryEntry {
    data: Bytes,
    meta: EntryMeta,
}

type EntryMap = Arc<Mutex<HashMap<String, MemoryEntry>>>;

/// Cache backend keeping every value in RAM.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: EntryMap,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, key: &str, honor_ttl: bool) -> Result<CacheReader, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key).ok_or(CacheError::NotFound)?;
        if honor_ttl && !entry.meta.is_fresh() {
            return Err(CacheError::Expired);
        }
        // Bytes clone is a refcount bump; the stream itself is read unlocked.
        Ok(Box::new(Cursor::new(entry.data.clone())))
    }

    fn with_meta(&self, key: &str, f: impl FnOnce(&mut EntryMeta)) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(key) {
            f(&mut entry.meta);
        }
    }
}

impl CacheBackend for MemoryCache {
    fn input<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Box<dyn CacheSink>> {
        let sink: Box<dyn CacheSink> = Box::new(MemorySink {
            key: key.to_string(),
            buffer: BytesMut::new(),
            entries: self.entries.clone(),
        });
        Box::pin(ready(Ok(sink)))
    }

    fn output<'a>(&'a self, key: &'a str) -> CacheFuture<'a, CacheReader> {
        Box::pin(ready(self.read(key, true)))
    }

    fn output_last_good_copy<'a>(&'a self, key: &'a str) -> CacheFuture<'a, CacheReader> {
        Box::pin(ready(self.read(key, false)))
    }

    fn expire(&self, key: &str, ttl: Ttl) {
        self.with_meta(key, |meta| meta.expire(ttl));
    }

    fn refresh(&self, key: &str) {
        self.with_meta(key, EntryMeta::refresh);
    }
}

/// Staging buffer for a value headed into a [`MemoryCache`].
struct MemorySink {
    key: String,
    buffer: BytesMut,
    entries: EntryMap,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl CacheSink for MemorySink {
    fn commit(self: Box<Self>) -> Result<(), CacheError> {
        let MemorySink { key, buffer, entries } = *self;
        let entry = MemoryEntry {
            data: buffer.freeze(),
            meta: EntryMeta::new(),
        };
        entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
        Ok(())
    }
}
