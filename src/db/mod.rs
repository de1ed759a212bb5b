//! Metadata resolution
//!
//! Maps an opaque file identifier to the blob-store key, declared size and
//! unit recorded in the relational store.

pub mod memory;
pub mod mysql;

pub use memory::InMemoryResolver;
pub use mysql::{MySqlResolver, MySqlResolverConfig};

use crate::types::FileDescriptor;

/// Errors from metadata resolution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// No row matched the identifier
    #[error("File not found: {0}")]
    NotFound(String),

    /// Store unreachable, query failed, or the row was unusable
    #[error("{0}")]
    Store(String),
}

/// Exact-match lookup of file metadata (allows mocking in tests)
#[async_trait::async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolve a decoded identifier to its descriptor
    async fn resolve(&self, identifier: &str) -> Result<FileDescriptor, ResolveError>;
}
