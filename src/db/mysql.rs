//! MySQL-backed metadata resolver
//!
//! Reads the `file_details` table. Sizes and units are cast to text in the
//! query so VARCHAR and DECIMAL columns decode the same way.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

use super::{MetadataResolver, ResolveError};
use crate::types::{normalize_folder, FileDescriptor, SizeUnit};

const LOOKUP_QUERY: &str = "SELECT file_key, CAST(file_size AS CHAR) AS file_size, \
     CAST(unit AS CHAR) AS unit, folder_name \
     FROM file_details WHERE id = ? LIMIT 1";

/// Connection settings for the metadata pool
#[derive(Debug, Clone)]
pub struct MySqlResolverConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

/// Metadata resolver over a MySQL connection pool
#[derive(Debug, Clone)]
pub struct MySqlResolver {
    pool: MySqlPool,
}

impl MySqlResolver {
    /// Open the pool and verify connectivity
    pub async fn connect(config: &MySqlResolverConfig) -> Result<Self, sqlx::Error> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!(
            "Connected to metadata store ({} max connections)",
            config.max_connections
        );

        Ok(Self { pool })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Metadata store connections closed");
    }
}

#[async_trait::async_trait]
impl MetadataResolver for MySqlResolver {
    async fn resolve(&self, identifier: &str) -> Result<FileDescriptor, ResolveError> {
        let row = sqlx::query(LOOKUP_QUERY)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ResolveError::Store(e.to_string()))?;

        let Some(row) = row else {
            debug!(identifier = %identifier, "No file_details row");
            return Err(ResolveError::NotFound(identifier.to_string()));
        };

        descriptor_from_row(&row)
    }
}

fn descriptor_from_row(row: &MySqlRow) -> Result<FileDescriptor, ResolveError> {
    let storage_key: String = row
        .try_get("file_key")
        .map_err(|e| ResolveError::Store(format!("file_key: {}", e)))?;
    let size: Option<String> = row
        .try_get("file_size")
        .map_err(|e| ResolveError::Store(format!("file_size: {}", e)))?;
    let unit: Option<String> = row
        .try_get("unit")
        .map_err(|e| ResolveError::Store(format!("unit: {}", e)))?;
    let folder_name: Option<String> = row
        .try_get("folder_name")
        .map_err(|e| ResolveError::Store(format!("folder_name: {}", e)))?;

    build_descriptor(storage_key, size.as_deref(), unit.as_deref(), folder_name)
}

/// Assemble a descriptor from raw column values
pub(crate) fn build_descriptor(
    storage_key: String,
    size: Option<&str>,
    unit: Option<&str>,
    folder_name: Option<String>,
) -> Result<FileDescriptor, ResolveError> {
    if storage_key.trim().is_empty() {
        return Err(ResolveError::Store("Row has an empty file_key".to_string()));
    }

    let declared_size = size
        .map(str::trim)
        .unwrap_or("0")
        .parse::<f64>()
        .map_err(|_| ResolveError::Store(format!("Unparseable file_size {:?}", size)))?;

    let size_unit = unit
        .unwrap_or("B")
        .parse::<SizeUnit>()
        .map_err(|e| ResolveError::Store(e.to_string()))?;

    Ok(FileDescriptor {
        storage_key,
        declared_size,
        size_unit,
        folder_name: normalize_folder(folder_name),
    })
}
