//! Courier - streaming download gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier::{
    config::Args,
    db::MySqlResolver,
    server::{self, AppState},
    storage::S3Fetcher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("courier={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let s3_config = args.s3_config();

    info!("======================================");
    info!("  Courier - streaming download gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen_addr());
    info!("Bucket: {}", s3_config.bucket);
    info!(
        "Region: {}",
        s3_config.region.as_deref().unwrap_or("(SDK default)")
    );
    if let Some(ref endpoint) = s3_config.endpoint_url {
        info!("Endpoint: {}", endpoint);
    }
    info!("Metadata store: {}", args.database_display());
    info!(
        "Bundles: prefetch {}, channel {} chunks",
        args.bundle_prefetch, args.bundle_channel_capacity
    );
    info!("======================================");

    let Some(resolver_config) = args.resolver_config() else {
        error!("No metadata store configured");
        std::process::exit(1);
    };
    let resolver = match MySqlResolver::connect(&resolver_config).await {
        Ok(resolver) => Arc::new(resolver),
        Err(e) => {
            error!("Metadata store connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let fetcher = Arc::new(S3Fetcher::new(&s3_config).await);

    let state = AppState::new(args.clone(), resolver.clone(), fetcher);
    if let Some(ref path) = args.transfer_log {
        if let Err(e) = state.transfer_log.init_file(path.clone()).await {
            warn!(
                "Transfer log {} unavailable, events will only be traced: {}",
                path.display(),
                e
            );
        }
    }

    let result = server::run(Arc::new(state), server::shutdown_signal()).await;

    resolver.close().await;
    info!("Courier stopped");

    result.map_err(Into::into)
}
