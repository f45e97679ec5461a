//! Media fetch port: bytes of a previously seen photo, by handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`MediaFetcher::fetch_bytes`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send + 'a>>;

/// Resolves a file handle to its bytes.
///
/// Not-found and too-large both come back as `None`, so callers have a
/// single failure path.
pub trait MediaFetcher: Send + Sync {
    /// Fetch the bytes behind `handle`, seen in `chat_id`.
    fn fetch_bytes(&self, chat_id: i64, handle: &str) -> FetchFuture<'_>;
}

impl<T: MediaFetcher + ?Sized> MediaFetcher for Arc<T> {
    fn fetch_bytes(&self, chat_id: i64, handle: &str) -> FetchFuture<'_> {
        (**self).fetch_bytes(chat_id, handle)
    }
}
