//! In-memory blob store
//!
//! Serves registered objects in fixed-size chunks. Chunks are sliced on
//! demand, so opening a stream copies nothing.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{BlobFetcher, ByteStream, FetchError};

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Simple in-memory blob store
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
    chunk_size: usize,
    opens: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
            opens: AtomicUsize::new(0),
        }
    }

    /// Store an object under `key`
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), data.into());
    }

    /// Number of streams opened so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobFetcher for InMemoryBlobStore {
    async fn open_stream(&self, key: &str) -> Result<ByteStream, FetchError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let data = self
            .blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()))?;

        let chunk_size = self.chunk_size;
        let stream = futures::stream::unfold(0usize, move |offset| {
            let data = data.clone();
            async move {
                if offset >= data.len() {
                    return None;
                }
                let end = (offset + chunk_size).min(data.len());
                Some((Ok(data.slice(offset..end)), end))
            }
        });

        Ok(Box::pin(stream))
    }
}
