//! Relay body: pulls blob chunks only when hyper asks for the next frame
//!
//! Pull-driven relay gives backpressure for free: a slow client stops the
//! polling, which stops the blob reads. Dropping the body (client gone)
//! drops the blob stream with it.

use bytes::Bytes;
use futures::Stream;
use hyper::body::{Body, Frame};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::{error, info, trace, warn};

use super::session::{ResponseState, StreamingSession};
use crate::logging::{TransferEventType, TransferLogger};
use crate::storage::ByteStream;
use crate::types::CourierError;

/// Streaming response body for one object
pub struct RelayBody {
    stream: ByteStream,
    session: StreamingSession,
    storage_key: String,
    prefetched: Option<Bytes>,
    logger: Option<TransferLogger>,
}

impl RelayBody {
    /// `session` must already have committed its headers
    pub fn new(
        session: StreamingSession,
        storage_key: impl Into<String>,
        stream: ByteStream,
    ) -> Self {
        Self {
            stream,
            session,
            storage_key: storage_key.into(),
            prefetched: None,
            logger: None,
        }
    }

    /// Chunk already pulled from the stream before headers were sent
    pub fn with_prefetched(mut self, chunk: Option<Bytes>) -> Self {
        self.prefetched = chunk;
        self
    }

    pub fn with_logger(mut self, logger: TransferLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    fn relay_chunk(&mut self, chunk: Bytes) -> Result<Frame<Bytes>, CourierError> {
        let chunk = match self.session.remaining() {
            Some(remaining) if chunk.len() as u64 > remaining => {
                error!(
                    identifier = %self.session.label(),
                    key = %self.storage_key,
                    declared = ?self.session.total(),
                    "Blob is larger than its declared size, truncating"
                );
                chunk.slice(..remaining as usize)
            }
            _ => chunk,
        };

        let progress = self.session.record_chunk(chunk.len())?;
        trace!(identifier = %self.session.label(), "{}", progress);
        Ok(Frame::data(chunk))
    }

    fn complete(&mut self) -> Option<Result<Frame<Bytes>, CourierError>> {
        if let Some(remaining) = self.session.remaining() {
            if remaining > 0 {
                let msg = format!(
                    "blob ended after {} of {} declared bytes",
                    self.session.downloaded(),
                    self.session.downloaded() + remaining
                );
                return Some(Err(self.abort(msg)));
            }
        }

        if let Err(e) = self.session.finish() {
            return Some(Err(e));
        }

        info!(
            "Download completed for fileId: {} ({} bytes)",
            self.session.label(),
            self.session.downloaded()
        );
        self.record(TransferEventType::DownloadCompleted, None);
        None
    }

    fn abort(&mut self, reason: String) -> CourierError {
        let previous = self.session.fail();
        error!(
            identifier = %self.session.label(),
            key = %self.storage_key,
            state = ?previous,
            downloaded = self.session.downloaded(),
            "Blob stream error, closing connection: {}",
            reason
        );
        self.record(TransferEventType::DownloadFailed, Some(reason.clone()));
        CourierError::Stream(reason)
    }

    fn record(&self, event_type: TransferEventType, reason: Option<String>) {
        let Some(ref logger) = self.logger else {
            return;
        };
        let progress = self.session.progress();
        let mut event = logger
            .event(event_type)
            .with_identifier(self.session.label())
            .with_storage_key(self.storage_key.clone())
            .with_bytes(progress.downloaded)
            .with_duration(progress.elapsed.as_millis() as u64);
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        logger.log_detached(event);
    }
}

impl Body for RelayBody {
    type Data = Bytes;
    type Error = CourierError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            if this.session.state().is_terminal() {
                return Poll::Ready(None);
            }

            let next = match this.prefetched.take() {
                Some(chunk) => Some(Ok(chunk)),
                None => ready!(this.stream.as_mut().poll_next(cx)),
            };

            match next {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    if this.session.remaining() == Some(0) {
                        // Declared length already sent; anything more is overflow.
                        error!(
                            identifier = %this.session.label(),
                            "Blob is larger than its declared size, ending at declared length"
                        );
                        return Poll::Ready(this.complete());
                    }
                    return Poll::Ready(Some(this.relay_chunk(chunk)));
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(this.abort(e.to_string())))),
                None => return Poll::Ready(this.complete()),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.session.state().is_terminal()
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        if self.session.state() == ResponseState::HeadersSent {
            warn!(
                identifier = %self.session.label(),
                downloaded = self.session.downloaded(),
                "Client disconnected mid-transfer, blob stream dropped"
            );
            self.session.fail();
            self.record(
                TransferEventType::DownloadFailed,
                Some("client disconnected".to_string()),
            );
        }
    }
}
