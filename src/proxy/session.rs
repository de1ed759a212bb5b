//! Per-download response state

use std::time::Instant;

use crate::logging::Progress;
use crate::types::CourierError;

/// Lifecycle of one outbound response
///
/// `HeadersPending -> HeadersSent -> Ended`, with `Errored` reachable from
/// either non-terminal state. Headers are write-once: nothing returns to
/// `HeadersPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    HeadersPending,
    HeadersSent,
    Ended,
    Errored,
}

impl ResponseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Errored)
    }
}

/// Tracking state for one single-object relay
#[derive(Debug)]
pub struct StreamingSession {
    label: String,
    total: Option<u64>,
    downloaded: u64,
    started: Instant,
    state: ResponseState,
}

impl StreamingSession {
    pub fn new(label: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            label: label.into(),
            total,
            downloaded: 0,
            started: Instant::now(),
            state: ResponseState::HeadersPending,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Whether body bytes may still be written
    pub fn is_writable(&self) -> bool {
        self.state == ResponseState::HeadersSent
    }

    /// Whether header mutation is still possible
    pub fn headers_pending(&self) -> bool {
        self.state == ResponseState::HeadersPending
    }

    /// Bytes still owed against the declared total
    pub fn remaining(&self) -> Option<u64> {
        self.total.map(|t| t.saturating_sub(self.downloaded))
    }

    /// `HeadersPending -> HeadersSent`
    pub fn commit_headers(&mut self) -> Result<(), CourierError> {
        match self.state {
            ResponseState::HeadersPending => {
                self.state = ResponseState::HeadersSent;
                Ok(())
            }
            other => Err(CourierError::Internal(format!(
                "headers already committed ({:?}) for {}",
                other, self.label
            ))),
        }
    }

    /// Count a relayed chunk; only legal while writable
    pub fn record_chunk(&mut self, len: usize) -> Result<Progress, CourierError> {
        if !self.is_writable() {
            return Err(CourierError::Stream(format!(
                "write in state {:?} for {}",
                self.state, self.label
            )));
        }
        self.downloaded += len as u64;
        Ok(self.progress())
    }

    /// `HeadersSent -> Ended`
    pub fn finish(&mut self) -> Result<(), CourierError> {
        match self.state {
            ResponseState::HeadersSent => {
                self.state = ResponseState::Ended;
                Ok(())
            }
            other => Err(CourierError::Internal(format!(
                "cannot end response in state {:?} for {}",
                other, self.label
            ))),
        }
    }

    /// Any non-terminal state -> `Errored`.
    ///
    /// Returns the state the failure happened in so callers can tell whether
    /// a status could still be sent.
    pub fn fail(&mut self) -> ResponseState {
        let previous = self.state;
        if !previous.is_terminal() {
            self.state = ResponseState::Errored;
        }
        previous
    }

    pub fn progress(&self) -> Progress {
        Progress {
            downloaded: self.downloaded,
            total: self.total,
            elapsed: self.started.elapsed(),
        }
    }
}
