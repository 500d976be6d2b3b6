//! On-disk cache backend.
//!
//! Each value lives in its own file named after the md5 of its key. Writers
//! stage into a unique temporary file that is renamed over the final path on
//! commit, so readers holding the previous file keep reading the old bytes.
//! The ttl index is in memory only; files this cache left behind in a previous
//! run are unreachable and get cleared on startup. Other files in the
//! directory are left alone.
//!
//! Files are opened and created through `tokio::fs`. The final rename on
//! commit and the temp file removal on abort run inline: both are single
//! metadata calls and sit on synchronous paths (`CacheSink::commit`, `Drop`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::AsyncWrite;

use crate::cache::backend::{
    CacheBackend, CacheError, CacheFuture, CacheReader, CacheSink, EntryMeta, Ttl,
};

const TEMP_SUFFIX: &str = ".partial";

type Index = Arc<Mutex<HashMap<String, EntryMeta>>>;

/// Cache backend storing values as files in a directory.
#[derive(Debug)]
pub struct DiskCache {
    directory: PathBuf,
    index: Index,
    next_id: AtomicU64,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;

        let mut cleared = 0usize;
        for dir_entry in std::fs::read_dir(&directory)? {
            let dir_entry = dir_entry?;
            let owned = dir_entry.file_name().to_str().is_some_and(is_cache_file_name);
            if owned && dir_entry.file_type()?.is_file() {
                std::fs::remove_file(dir_entry.path())?;
                cleared += 1;
            }
        }

        tracing::info!(
            directory = %directory.display(),
            cleared,
            "Disk cache ready"
        );

        Ok(Self {
            directory,
            index: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(file_name(key))
    }

    async fn read(&self, key: &str, honor_ttl: bool) -> Result<CacheReader, CacheError> {
        {
            let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            let meta = index.get(key).ok_or(CacheError::NotFound)?;
            if honor_ttl && !meta.is_fresh() {
                return Err(CacheError::Expired);
            }
        }

        match File::open(self.path_for(key)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::NotFound),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn create(&self, key: &str) -> Result<Box<dyn CacheSink>, CacheError> {
        let final_path = self.path_for(key);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .directory
            .join(format!("{}.{}{}", file_name(key), id, TEMP_SUFFIX));

        let file = File::create(&temp_path).await?;

        Ok(Box::new(DiskSink {
            key: key.to_string(),
            file: Some(file),
            temp_path,
            final_path,
            index: self.index.clone(),
            committed: false,
        }))
    }

    fn with_meta(&self, key: &str, f: impl FnOnce(&mut EntryMeta)) {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(meta) = index.get_mut(key) {
            f(meta);
        }
    }
}

/// `hex(md5(key))`, a filesystem-safe name for any key.
fn file_name(key: &str) -> String {
    hex::encode(Md5::digest(key.as_bytes()))
}

/// True for names produced by [`file_name`], or for its temporary
/// `<name>.<id>.partial` variant.
fn is_cache_file_name(name: &str) -> bool {
    let Some((stem, rest)) = name.get(..32).zip(name.get(32..)) else {
        return false;
    };
    let md5_hex = stem.bytes().all(|b| b.is_ascii_hexdigit());
    let temp_id = rest
        .strip_prefix('.')
        .and_then(|r| r.strip_suffix(TEMP_SUFFIX))
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()));
    md5_hex && (rest.is_empty() || temp_id)
}

impl CacheBackend for DiskCache {
    fn input<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Box<dyn CacheSink>> {
        Box::pin(self.create(key))
    }

    fn output<'a>(&'a self, key: &'a str) -> CacheFuture<'a, CacheReader> {
        Box::pin(self.read(key, true))
    }

    fn output_last_good_copy<'a>(&'a self, key: &'a str) -> CacheFuture<'a, CacheReader> {
        Box::pin(self.read(key, false))
    }

    fn expire(&self, key: &str, ttl: Ttl) {
        self.with_meta(key, |meta| meta.expire(ttl));
    }

    fn refresh(&self, key: &str) {
        self.with_meta(key, EntryMeta::refresh);
    }
}

/// Temporary file receiving a value headed into a [`DiskCache`].
struct DiskSink {
    key: String,
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    index: Index,
    committed: bool,
}

impl DiskSink {
    fn file(&mut self) -> std::io::Result<Pin<&mut File>> {
        self.file
            .as_mut()
            .map(Pin::new)
            .ok_or_else(|| std::io::Error::other("cache sink already closed"))
    }
}

impl AsyncWrite for DiskSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.file() {
            Ok(file) => file.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.file() {
            Ok(file) => file.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.file() {
            Ok(file) => file.poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl CacheSink for DiskSink {
    fn commit(mut self: Box<Self>) -> Result<(), CacheError> {
        // Close the handle before the rename.
        drop(self.file.take());
        std::fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;

        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key.clone(), EntryMeta::new());
        Ok(())
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            tracing::warn!(
                key = %self.key,
                path = %self.temp_path.display(),
                error = %e,
                "Failed to remove discarded cache file"
            );
        } else {
            tracing::debug!(key = %self.key, "Discarded uncommitted cache value");
        }
    }
}
