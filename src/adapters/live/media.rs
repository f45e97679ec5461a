//! Photo storage on the local filesystem.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use image::ImageFormat;
use tracing::{debug, warn};

use crate::error::BotError;
use crate::ports::media::FetchFuture;
use crate::ports::MediaFetcher;

/// Largest file the caching fetcher will serve or store.
pub const MAX_CACHED_BYTES: usize = 20 * 1024 * 1024;

/// Photos kept under one directory, addressed by handle.
pub struct LocalMediaStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl LocalMediaStore {
    /// Store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), counter: AtomicU64::new(0) }
    }

    /// Write `bytes` under a fresh handle and return it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub async fn store(&self, bytes: &[u8]) -> Result<String, BotError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let handle = format!("{}-{n}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"));
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(&handle), bytes).await?;
        debug!(handle = %handle, bytes = bytes.len(), "photo stored");
        Ok(handle)
    }

    /// Where `handle` lives on disk.
    #[must_use]
    pub fn path_for(&self, handle: &str) -> PathBuf {
        self.dir.join(sanitize_handle(handle))
    }
}

impl MediaFetcher for LocalMediaStore {
    fn fetch_bytes(&self, _chat_id: i64, handle: &str) -> FetchFuture<'_> {
        let path = self.path_for(handle);
        Box::pin(async move { tokio::fs::read(&path).await.ok() })
    }
}

/// Keeps a per-chat disk copy of everything an inner fetcher returns.
pub struct CachingMediaFetcher {
    inner: Box<dyn MediaFetcher>,
    cache_dir: PathBuf,
    max_bytes: usize,
}

impl CachingMediaFetcher {
    /// Cache `inner` under `cache_dir`, refusing files over [`MAX_CACHED_BYTES`].
    #[must_use]
    pub fn new(inner: Box<dyn MediaFetcher>, cache_dir: impl Into<PathBuf>) -> Self {
        Self { inner, cache_dir: cache_dir.into(), max_bytes: MAX_CACHED_BYTES }
    }

    /// Use a different size cap.
    #[cfg(test)]
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn cached(&self, dir: &Path, stem: &str) -> Option<Vec<u8>> {
        for ext in EXTENSIONS {
            let path = dir.join(format!("{stem}.{ext}"));
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if bytes.len() <= self.max_bytes {
                    return Some(bytes);
                }
            }
        }
        None
    }
}

impl MediaFetcher for CachingMediaFetcher {
    fn fetch_bytes(&self, chat_id: i64, handle: &str) -> FetchFuture<'_> {
        let handle = handle.to_string();
        Box::pin(async move {
            let dir = self.cache_dir.join(chat_id.to_string());
            let stem = sanitize_handle(&handle);
            if let Some(bytes) = self.cached(&dir, &stem).await {
                debug!(chat_id, handle = %handle, "media cache hit");
                return Some(bytes);
            }

            let bytes = self.inner.fetch_bytes(chat_id, &handle).await?;
            if bytes.len() > self.max_bytes {
                warn!(chat_id, handle = %handle, bytes = bytes.len(), "media too large");
                return None;
            }
            let path = dir.join(format!("{stem}.{}", extension_for(&bytes)));
            let written = match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => tokio::fs::write(&path, &bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(path = %path.display(), error = %e, "media cache write failed");
            }
            Some(bytes)
        })
    }
}

const EXTENSIONS: [&str; 4] = ["jpg", "png", "gif", "webp"];

/// File extension from magic bytes; unknown content is stored as png.
#[must_use]
pub fn extension_for(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::WebP) => "webp",
        _ => "png",
    }
}

/// Handle reduced to characters safe in a file name.
fn sanitize_handle(handle: &str) -> String {
    let cleaned: String = handle
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".into()
    } else {
        cleaned
    }
}
