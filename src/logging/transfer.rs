//! Transfer logging
//!
//! Records completed and failed transfers as JSONL, one event per line.
//! Without a file configured, events are only traced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Transfer event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferEventType {
    /// Single object relayed to the end
    DownloadCompleted,
    /// Single object relay stopped early
    DownloadFailed,
    /// Bundle finalized
    BundleCompleted,
    /// Bundle stopped before finalization
    BundleAborted,
    /// Bundle member left out
    EntrySkipped,
}

/// One transfer record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: TransferEventType,
    /// Gateway instance that served the transfer
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Entries written (bundles only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    /// Members skipped (bundles only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransferEvent {
    pub fn new(event_type: TransferEventType, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id,
            identifier: None,
            storage_key: None,
            bytes: None,
            duration_ms: None,
            entries: None,
            skipped: None,
            reason: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_counts(mut self, entries: usize, skipped: usize) -> Self {
        self.entries = Some(entries);
        self.skipped = Some(skipped);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Transfer logger that appends events to a JSONL file
#[derive(Clone)]
pub struct TransferLogger {
    inner: Arc<Mutex<TransferLoggerInner>>,
    node_id: String,
}

struct TransferLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl TransferLogger {
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransferLoggerInner {
                writer: None,
                path: None,
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Transfer logging initialized to {}", path.display());
        Ok(())
    }

    /// Start an event stamped with this node
    pub fn event(&self, event_type: TransferEventType) -> TransferEvent {
        TransferEvent::new(event_type, self.node_id.clone())
    }

    /// Log a transfer event
    pub async fn log(&self, event: TransferEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize transfer event: {}", e);
                return;
            }
        };

        debug!(target: "courier::transfer", "{}", jsonl);

        let mut inner = self.inner.lock().await;
        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write transfer event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush transfer log: {}", e);
            }
        }
    }

    /// Log from a synchronous context (response body polling)
    pub fn log_detached(&self, event: TransferEvent) {
        let logger = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { logger.log(event).await });
            }
            Err(_) => debug!("No runtime for transfer event {:?}", event.event_type),
        }
    }

    /// Path of the JSONL file, if file logging is enabled
    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }
}
