//! Preprocessing server binary
//!
//! Run with: cargo run -p dataprep --bin dataprep-server

use dataprep::{config::PrepConfig, server::PrepServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataprep=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                    DataPrep Service                       ║
║        Tabular Preprocessing with Background Jobs         ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // DATAPREP_CONFIG, DATAPREP_HOST, DATAPREP_PORT, DATAPREP_DATA_DIR
    let config = PrepConfig::from_env()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Data directory: {}", config.storage.data_dir.display());
    tracing::info!("  - Workers: {}", config.processing.workers());
    tracing::info!("  - Queue capacity: {}", config.processing.queue_capacity);
    tracing::info!("  - Lock timeout: {}s", config.processing.lock_timeout_secs);
    tracing::info!("  - Max upload size: {} bytes", config.server.max_upload_size);

    let server = PrepServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/datasets/upload          - Upload a dataset");
    println!("  POST /api/preprocessing/execute    - Start a pipeline");
    println!("  GET  /api/preprocessing/status/:id - Poll a job");
    println!("  GET  /api/datasets/export/:id      - Download results");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
