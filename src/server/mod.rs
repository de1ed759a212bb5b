//! HTTP server and shared application state

pub mod http;

pub use http::{route, run, serve, shutdown_signal};

use std::sync::Arc;
use std::time::Instant;

use crate::archive::ArchiveAggregator;
use crate::config::Args;
use crate::db::MetadataResolver;
use crate::logging::TransferLogger;
use crate::proxy::SingleObjectProxy;
use crate::storage::BlobFetcher;

/// Shared application state
///
/// Client handles are built once at startup and injected here; handlers
/// only ever borrow them.
pub struct AppState {
    pub args: Args,
    /// Identifier to descriptor lookups (MySQL in production)
    pub resolver: Arc<dyn MetadataResolver>,
    /// Blob streams (S3 in production)
    pub fetcher: Arc<dyn BlobFetcher>,
    pub transfer_log: TransferLogger,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        resolver: Arc<dyn MetadataResolver>,
        fetcher: Arc<dyn BlobFetcher>,
    ) -> Self {
        let transfer_log = TransferLogger::new(args.node_id.to_string());
        Self {
            args,
            resolver,
            fetcher,
            transfer_log,
            started_at: Instant::now(),
        }
    }

    /// Single-object proxy over this state's clients
    pub fn proxy(&self) -> SingleObjectProxy {
        SingleObjectProxy::new(Arc::clone(&self.resolver), Arc::clone(&self.fetcher))
            .with_logger(self.transfer_log.clone())
    }

    /// Bundle aggregator over this state's clients
    pub fn aggregator(&self) -> ArchiveAggregator {
        ArchiveAggregator::new(Arc::clone(&self.resolver), Arc::clone(&self.fetcher))
            .with_prefetch(self.args.bundle_prefetch)
            .with_logger(self.transfer_log.clone())
    }
}
