//! S3 blob fetcher

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{BlobFetcher, ByteStream, FetchError};

/// Read buffer per pulled chunk
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Connection settings for the blob store
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// S3-compatible endpoint; forces path-style addressing
    pub endpoint_url: Option<String>,
}

/// Blob fetcher backed by one S3 bucket
#[derive(Clone)]
pub struct S3Fetcher {
    client: Client,
    bucket: String,
}

impl S3Fetcher {
    /// Build a client from static credentials, or the SDK default chain
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            loader = loader.region(Region::new(region.clone()));
        }

        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "courier-static",
            ));
        }

        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.endpoint_url.is_some() {
            builder = builder.force_path_style(true);
        }

        info!("S3 client ready for bucket '{}'", config.bucket);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait::async_trait]
impl BlobFetcher for S3Fetcher {
    async fn open_stream(&self, key: &str) -> Result<ByteStream, FetchError> {
        debug!(bucket = %self.bucket, key = %key, "GetObject");

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.into_service_error() {
                GetObjectError::NoSuchKey(_) => FetchError::NotFound(key.to_string()),
                other => FetchError::Transport(DisplayErrorContext(&other).to_string()),
            })?;

        let reader = output.body.into_async_read();
        let stream = ReaderStream::with_capacity(reader, READ_CHUNK_SIZE)
            .map_err(|e| FetchError::Transport(format!("Blob read failed: {}", e)));

        Ok(Box::pin(stream))
    }
}
