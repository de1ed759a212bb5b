//! Streamed ZIP bundles
//!
//! [`ZipStreamWriter`] frames entries forward-only into an [`ArchiveSink`];
//! [`ArchiveAggregator`] fans out over the requested identifiers and feeds
//! the writer one entry at a time.

pub mod aggregator;
pub mod zip_stream;

pub use aggregator::{
    ArchiveAggregator, ArchiveSession, BundleReport, SkippedMember, DEFAULT_PREFETCH,
};
pub use zip_stream::{dos_datetime, ArchiveError, ArchiveSink, EntrySummary, ZipStreamWriter};
