//! Logging infrastructure for Courier
//!
//! Progress rendering for trace-level relay logs and a JSONL transfer log.

pub mod progress;
pub mod transfer;

pub use progress::{format_bytes, Progress};
pub use transfer::{TransferEvent, TransferEventType, TransferLogger};
