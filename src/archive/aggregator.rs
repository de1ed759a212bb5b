//! Archive aggregator
//!
//! One task per requested identifier. Each task resolves its identifier,
//! opens the blob and pulls the first chunk without touching the writer,
//! then takes the session lock and streams its whole entry. A semaphore
//! bounds how many members are open at once.
//!
//! Member failures (unknown identifier, missing key, fetch error) drop
//! that member only. Writer or client failures end the whole bundle.

use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::zip_stream::{ArchiveError, ArchiveSink, ZipStreamWriter};
use crate::db::MetadataResolver;
use crate::logging::{format_bytes, TransferEventType, TransferLogger};
use crate::storage::{BlobFetcher, ByteStream};
use crate::types::FileDescriptor;

/// Default number of members prepared ahead of the writer
pub const DEFAULT_PREFETCH: usize = 4;

/// A requested member that did not make it into the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMember {
    pub identifier: String,
    pub reason: String,
}

/// Outcome of one bundle
#[derive(Debug, Clone, Default)]
pub struct BundleReport {
    pub requested: usize,
    /// File entries written, truncated ones included
    pub files: usize,
    pub directories: usize,
    /// File entries cut short by a blob failure
    pub truncated: usize,
    pub skipped: Vec<SkippedMember>,
    /// Uncompressed bytes across all file entries
    pub payload_bytes: u64,
    pub duration: Duration,
}

/// A member ready to be written: resolved, opened and first chunk in hand
struct PreparedMember {
    identifier: String,
    descriptor: FileDescriptor,
    stream: ByteStream,
    first: Option<Bytes>,
}

enum MemberOutcome {
    Written { bytes: u64, truncated: bool },
    Skipped(SkippedMember),
}

/// Writer plus per-bundle bookkeeping, shared by the member tasks
pub struct ArchiveSession<S> {
    writer: ZipStreamWriter<S>,
    processed_folders: HashSet<String>,
}

impl<S: ArchiveSink> ArchiveSession<S> {
    pub fn new(writer: ZipStreamWriter<S>) -> Self {
        Self {
            writer,
            processed_folders: HashSet::new(),
        }
    }

    /// Write the directory entry for `folder` unless this bundle already has one
    pub async fn ensure_folder(&mut self, folder: &str) -> Result<(), ArchiveError> {
        if self.processed_folders.contains(folder) {
            return Ok(());
        }
        self.writer.add_directory(folder).await?;
        self.processed_folders.insert(folder.to_string());
        Ok(())
    }

    pub fn folder_count(&self) -> usize {
        self.processed_folders.len()
    }

    async fn append(&mut self, member: PreparedMember) -> Result<MemberOutcome, ArchiveError> {
        let PreparedMember {
            identifier,
            descriptor,
            mut stream,
            first,
        } = member;

        if let Some(ref folder) = descriptor.folder_name {
            self.ensure_folder(folder).await?;
        }

        let entry_name = descriptor.entry_name();
        self.writer.start_file(&entry_name).await?;

        if let Some(chunk) = first {
            self.writer.write_chunk(&chunk).await?;
        }

        let mut truncated = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => self.writer.write_chunk(&chunk).await?,
                Err(e) => {
                    error!(
                        identifier = %identifier,
                        entry = %entry_name,
                        "Blob failed mid-entry, closing it truncated: {}",
                        e
                    );
                    truncated = true;
                    break;
                }
            }
        }

        let summary = self.writer.finish_file().await?;
        debug!(
            identifier = %identifier,
            entry = %entry_name,
            size = %format_bytes(summary.uncompressed),
            compressed = %format_bytes(summary.compressed),
            "Archive entry written"
        );

        Ok(MemberOutcome::Written {
            bytes: summary.uncompressed,
            truncated,
        })
    }

    fn into_writer(self) -> ZipStreamWriter<S> {
        self.writer
    }
}

/// Builds one streamed archive out of many identifiers
#[derive(Clone)]
pub struct ArchiveAggregator {
    resolver: Arc<dyn MetadataResolver>,
    fetcher: Arc<dyn BlobFetcher>,
    prefetch: usize,
    logger: Option<TransferLogger>,
}

impl ArchiveAggregator {
    pub fn new(resolver: Arc<dyn MetadataResolver>, fetcher: Arc<dyn BlobFetcher>) -> Self {
        Self {
            resolver,
            fetcher,
            prefetch: DEFAULT_PREFETCH,
            logger: None,
        }
    }

    /// Members prepared concurrently (at least one)
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_logger(mut self, logger: TransferLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Write every resolvable member of `identifiers` into `sink`, then the
    /// central directory.
    ///
    /// Returns the sink once the archive is complete. On error the archive
    /// is left unfinished and every member task has been cancelled.
    pub async fn build<S>(
        &self,
        identifiers: Vec<String>,
        sink: S,
    ) -> Result<(S, BundleReport), ArchiveError>
    where
        S: ArchiveSink + 'static,
    {
        let started = Instant::now();
        let mut report = BundleReport {
            requested: identifiers.len(),
            ..Default::default()
        };

        let session = Arc::new(Mutex::new(ArchiveSession::new(ZipStreamWriter::new(sink))));
        let permits = Arc::new(Semaphore::new(self.prefetch));

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for identifier in identifiers {
            let member = self.clone();
            let session = session.clone();
            let permits = permits.clone();
            let id = identifier.clone();
            let handle = tasks.spawn(async move { member.process(id, permits, session).await });
            names.insert(handle.id(), identifier);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(MemberOutcome::Written { bytes, truncated }))) => {
                    report.files += 1;
                    report.payload_bytes += bytes;
                    if truncated {
                        report.truncated += 1;
                    }
                }
                Ok((_, Ok(MemberOutcome::Skipped(skipped)))) => report.skipped.push(skipped),
                Ok((_, Err(e))) => {
                    tasks.abort_all();
                    warn!("Bundle aborted after {} entries: {}", report.files, e);
                    self.log_aborted(&report, started, &e);
                    return Err(e);
                }
                Err(e) => {
                    // A panicking member never leaves an entry half-open for
                    // long: the next writer call closes it.
                    let identifier = names.remove(&e.id()).unwrap_or_default();
                    error!(identifier = %identifier, "Archive member task failed: {}", e);
                    report.skipped.push(SkippedMember {
                        identifier,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let session = Arc::try_unwrap(session)
            .map_err(|_| ArchiveError::Io(std::io::Error::other("archive session still shared")))?
            .into_inner();
        report.directories = session.folder_count();

        let sink = match session.into_writer().finish().await {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Archive finalization failed: {}", e);
                self.log_aborted(&report, started, &e);
                return Err(e);
            }
        };
        report.duration = started.elapsed();

        info!(
            requested = report.requested,
            files = report.files,
            directories = report.directories,
            skipped = report.skipped.len(),
            truncated = report.truncated,
            "Bundle complete: {} in {:?}",
            format_bytes(report.payload_bytes),
            report.duration
        );
        if let Some(ref logger) = self.logger {
            logger.log_detached(
                logger
                    .event(TransferEventType::BundleCompleted)
                    .with_bytes(report.payload_bytes)
                    .with_duration(report.duration.as_millis() as u64)
                    .with_counts(report.files, report.skipped.len()),
            );
        }

        Ok((sink, report))
    }

    async fn process<S: ArchiveSink>(
        self,
        identifier: String,
        permits: Arc<Semaphore>,
        session: Arc<Mutex<ArchiveSession<S>>>,
    ) -> Result<MemberOutcome, ArchiveError> {
        let Ok(_permit) = permits.acquire().await else {
            return Ok(MemberOutcome::Skipped(SkippedMember {
                identifier,
                reason: "bundle closed".to_string(),
            }));
        };

        let member = match self.prepare(&identifier).await {
            Ok(member) => member,
            Err(reason) => {
                warn!(identifier = %identifier, "Skipping archive member: {}", reason);
                if let Some(ref logger) = self.logger {
                    logger.log_detached(
                        logger
                            .event(TransferEventType::EntrySkipped)
                            .with_identifier(&identifier)
                            .with_reason(&reason),
                    );
                }
                return Ok(MemberOutcome::Skipped(SkippedMember { identifier, reason }));
            }
        };

        let mut session = session.lock().await;
        session.append(member).await
    }

    async fn prepare(&self, identifier: &str) -> Result<PreparedMember, String> {
        let descriptor = self
            .resolver
            .resolve(identifier)
            .await
            .map_err(|e| e.to_string())?;

        if descriptor.file_name().is_empty() {
            return Err(format!(
                "storage key {:?} has no file name",
                descriptor.storage_key
            ));
        }

        let mut stream = self
            .fetcher
            .open_stream(&descriptor.storage_key)
            .await
            .map_err(|e| e.to_string())?;

        let first = loop {
            match stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break Some(chunk),
                Some(Err(e)) => return Err(e.to_string()),
                None => break None,
            }
        };

        Ok(PreparedMember {
            identifier: identifier.to_string(),
            descriptor,
            stream,
            first,
        })
    }

    fn log_aborted(&self, report: &BundleReport, started: Instant, err: &ArchiveError) {
        if let Some(ref logger) = self.logger {
            logger.log_detached(
                logger
                    .event(TransferEventType::BundleAborted)
                    .with_bytes(report.payload_bytes)
                    .with_duration(started.elapsed().as_millis() as u64)
                    .with_counts(report.files, report.skipped.len())
                    .with_reason(err.to_string()),
            );
        }
    }
}
