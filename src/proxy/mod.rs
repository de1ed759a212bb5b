//! Single-object streaming proxy
//!
//! Resolves an identifier, opens the blob and relays it as one attachment:
//!
//! 1. Decode the identifier (`400` when missing or malformed, no lookups)
//! 2. Resolve metadata (`404` unknown, `500` store failure)
//! 3. Open the blob and pull its first chunk (`404` missing key, `500` other)
//! 4. Commit headers, then relay the remaining chunks on demand
//!
//! Anything that fails after step 4 can only close the connection.

pub mod headers;
pub mod relay;
pub mod session;

pub use relay::RelayBody;
pub use session::{ResponseState, StreamingSession};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use futures::StreamExt;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::MetadataResolver;
use crate::logging::TransferLogger;
use crate::storage::BlobFetcher;
use crate::types::{file_name_from_key, CourierError};

const INVALID_ID: &str = "Invalid fileId";

/// Decode the base64 `key` query value into the lookup key.
///
/// Accepts the standard and URL-safe alphabets with or without padding.
/// Spaces are read back as `+`, since form decoding turns an unescaped `+`
/// into a space.
pub fn decode_identifier(raw: Option<&str>) -> Result<String, CourierError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CourierError::BadRequest(INVALID_ID.to_string()))?;

    let raw = raw.replace(' ', "+");
    let decoded = STANDARD
        .decode(&raw)
        .or_else(|_| STANDARD_NO_PAD.decode(&raw))
        .or_else(|_| URL_SAFE.decode(&raw))
        .or_else(|_| URL_SAFE_NO_PAD.decode(&raw))
        .map_err(|_| CourierError::BadRequest(INVALID_ID.to_string()))?;

    let identifier = String::from_utf8(decoded)
        .map_err(|_| CourierError::BadRequest(INVALID_ID.to_string()))?;

    if identifier.trim().is_empty() {
        return Err(CourierError::BadRequest(INVALID_ID.to_string()));
    }

    Ok(identifier)
}

/// Streams single objects out of the blob store
#[derive(Clone)]
pub struct SingleObjectProxy {
    resolver: Arc<dyn MetadataResolver>,
    fetcher: Arc<dyn BlobFetcher>,
    logger: Option<TransferLogger>,
}

impl SingleObjectProxy {
    pub fn new(resolver: Arc<dyn MetadataResolver>, fetcher: Arc<dyn BlobFetcher>) -> Self {
        Self {
            resolver,
            fetcher,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: TransferLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Download by encoded identifier, framed with the declared size
    pub async fn download(
        &self,
        encoded_key: Option<&str>,
    ) -> Result<Response<RelayBody>, CourierError> {
        let identifier = decode_identifier(encoded_key)?;
        debug!(identifier = %identifier, "Resolving download");

        let descriptor = self.resolver.resolve(&identifier).await?;
        let total = descriptor.total_size_bytes().map_err(|e| {
            CourierError::Store(format!("{} (fileId {})", e, identifier))
        })?;

        let session = StreamingSession::new(identifier, Some(total));
        self.open_and_relay(session, &descriptor.storage_key).await
    }

    /// Download straight from a storage key, size unknown
    pub async fn download_key(
        &self,
        storage_key: &str,
    ) -> Result<Response<RelayBody>, CourierError> {
        if storage_key.trim().is_empty() {
            return Err(CourierError::BadRequest(INVALID_ID.to_string()));
        }
        let session = StreamingSession::new(storage_key, None);
        self.open_and_relay(session, storage_key).await
    }

    async fn open_and_relay(
        &self,
        mut session: StreamingSession,
        storage_key: &str,
    ) -> Result<Response<RelayBody>, CourierError> {
        let mut stream = self.fetcher.open_stream(storage_key).await?;

        // Pull once while a status can still be chosen.
        let first = match stream.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) => {
                session.fail();
                warn!(key = %storage_key, "Blob failed before first byte: {}", e);
                return Err(e.into());
            }
            None => None,
        };

        let response = headers::object_headers(
            Response::builder().status(StatusCode::OK),
            file_name_from_key(storage_key),
            session.total(),
        )
        .body(())
        .map_err(|e| CourierError::Internal(format!("Invalid response headers: {}", e)))?;

        session.commit_headers()?;

        let mut body = RelayBody::new(session, storage_key, stream).with_prefetched(first);
        if let Some(ref logger) = self.logger {
            body = body.with_logger(logger.clone());
        }

        Ok(response.map(|_| body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryResolver;
    use crate::storage::InMemoryBlobStore;
    use crate::types::{FileDescriptor, SizeUnit};
    use http_body_util::BodyExt;
    use hyper::header;

    fn encode(id: &str) -> String {
        STANDARD.encode(id)
    }

    fn fixture() -> (Arc<InMemoryResolver>, Arc<InMemoryBlobStore>, SingleObjectProxy) {
        let resolver = Arc::new(InMemoryResolver::new());
        let store = Arc::new(InMemoryBlobStore::with_chunk_size(3));
        let proxy = SingleObjectProxy::new(resolver.clone(), store.clone());
        (resolver, store, proxy)
    }

    #[test]
    fn test_decode_identifier() {
        assert_eq!(decode_identifier(Some("MTIz")).unwrap(), "123");
        assert_eq!(decode_identifier(Some("MTIzNA")).unwrap(), "1234");
        assert_eq!(decode_identifier(Some("  MTIzNA==  ")).unwrap(), "1234");
        // "+" mangled into a space by form decoding
        assert_eq!(decode_identifier(Some("Pz8/ Pw==")).unwrap(), "????");
        assert_eq!(decode_identifier(Some("Pz8_Pw")).unwrap(), "????");
    }

    #[test]
    fn test_decode_identifier_rejects_bad_input() {
        for raw in [None, Some(""), Some("   "), Some("!!!"), Some("IA=="), Some("/w==")] {
            assert!(
                matches!(decode_identifier(raw), Err(CourierError::BadRequest(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_download_success() {
        let (resolver, store, proxy) = fixture();
        resolver.insert("9", FileDescriptor::new("uploads/n/file.bin", 10.0, SizeUnit::B));
        store.put("uploads/n/file.bin", &b"0123456789"[..]);

        let response = proxy.download(Some(&encode("9"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"file.bin\""
        );
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-9/10");
        assert_eq!(response.body().session().state(), ResponseState::HeadersSent);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_calls() {
        let (resolver, store, proxy) = fixture();
        let err = proxy.download(None).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(resolver.lookups(), 0);
        assert_eq!(store.opens(), 0);
    }

    #[tokio::test]
    async fn test_unknown_identifier_skips_blob_store() {
        let (resolver, store, proxy) = fixture();
        let err = proxy.download(Some(&encode("404"))).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(resolver.lookups(), 1);
        assert_eq!(store.opens(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let (resolver, _store, proxy) = fixture();
        resolver.fail_with("Too many connections");
        let (status, body) = proxy
            .download(Some(&encode("1")))
            .await
            .err()
            .unwrap()
            .into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Too many connections"));
    }

    #[tokio::test]
    async fn test_missing_blob_is_404() {
        let (resolver, store, proxy) = fixture();
        resolver.insert("5", FileDescriptor::new("gone.bin", 1.0, SizeUnit::KB));
        let err = proxy.download(Some(&encode("5"))).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(store.opens(), 1);
    }

    #[tokio::test]
    async fn test_negative_declared_size_is_store_error() {
        let (resolver, store, proxy) = fixture();
        resolver.insert("6", FileDescriptor::new("neg.bin", -1.0, SizeUnit::KB));
        let err = proxy.download(Some(&encode("6"))).await.err().unwrap();
        assert!(matches!(err, CourierError::Store(_)));
        assert_eq!(store.opens(), 0);
    }

    #[tokio::test]
    async fn test_relay_is_repeatable() {
        let (resolver, store, proxy) = fixture();
        let data: Vec<u8> = (0..=255u8).cycle().take(4099).collect();
        resolver.insert("r", FileDescriptor::new("r/data.bin", 4099.0, SizeUnit::B));
        store.put("r/data.bin", data.clone());

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let response = proxy.download(Some(&encode("r"))).await.unwrap();
            outputs.push(response.into_body().collect().await.unwrap().to_bytes());
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(&outputs[0][..], &data[..]);
    }

    #[tokio::test]
    async fn test_download_key_without_size() {
        let (_resolver, store, proxy) = fixture();
        store.put("team/a/b.txt", &b"hello"[..]);

        let response = proxy.download_key("team/a/b.txt").await.unwrap();
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"b.txt\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_empty_object() {
        let (resolver, store, proxy) = fixture();
        resolver.insert("e", FileDescriptor::new("e/empty.txt", 0.0, SizeUnit::B));
        store.put("e/empty.txt", Vec::new());

        let response = proxy.download(Some(&encode("e"))).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "0");
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }
}
