//! Blob fetching
//!
//! A fetcher opens a lazy byte stream for a storage key. Nothing is read
//! until the consumer polls, and errors after opening arrive as stream items.

pub mod memory;
pub mod s3;

pub use memory::InMemoryBlobStore;
pub use s3::{S3Config, S3Fetcher};

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Errors from the blob store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// The store reported the key does not exist
    #[error("No such key: {0}")]
    NotFound(String),

    /// Any other failure, before or during transfer
    #[error("{0}")]
    Transport(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Lazy, finite, non-restartable sequence of object bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Opens object streams by key (allows different backends)
#[async_trait::async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Open a lazily-read stream for `key`
    async fn open_stream(&self, key: &str) -> Result<ByteStream, FetchError>;
}
