//! In-memory metadata resolver

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{MetadataResolver, ResolveError};
use crate::types::FileDescriptor;

/// Simple in-memory resolver
pub struct InMemoryResolver {
    entries: RwLock<HashMap<String, FileDescriptor>>,
    store_failure: RwLock<Option<String>>,
    lookups: AtomicUsize,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store_failure: RwLock::new(None),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Register a descriptor under an identifier
    pub fn insert(&self, identifier: impl Into<String>, descriptor: FileDescriptor) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.into(), descriptor);
    }

    /// Make every lookup fail as if the store were unreachable
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.store_failure.write().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Number of lookups performed so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetadataResolver for InMemoryResolver {
    async fn resolve(&self, identifier: &str) -> Result<FileDescriptor, ResolveError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if let Some(msg) = self
            .store_failure
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(ResolveError::Store(msg));
        }

        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identifier)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(identifier.to_string()))
    }
}
