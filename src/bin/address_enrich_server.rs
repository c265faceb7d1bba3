//! Address enrichment HTTP server
//!
//! Serves `GET /` (start a run in the background) and `GET /api/health`.
//!
//! Usage:
//!   ADDRESS_FILE_PATH=/data/fias ADDRESS_FILE_NAME=fias_dbf.zip \
//!     cargo run --bin address_enrich_server
//!
//! Environment:
//!   DATABASE_URL, DATABASE_POOL_SIZE   Postgres connection
//!   ADDRESS_FILE_PATH, ADDRESS_FILE_NAME   archive location
//!   ENRICH_CHUNK_SIZE, ENRICH_WORKER_POOL_SIZE, ENRICH_AMBIGUITY_POLICY
//!   BIND (default 0.0.0.0), PORT (default 3000)

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use address_enrich::api::{create_router, AppState};
use address_enrich::{AddressEnrichmentService, DatabaseManager, EnrichConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "address_enrich=info,tower_http=info".into()),
        )
        .init();

    let config = EnrichConfig::from_env().context("Invalid enrichment configuration")?;

    let db = DatabaseManager::with_default_config()
        .await
        .context("Failed to connect to database")?;
    db.test_connection()
        .await
        .context("Database connectivity check failed")?;
    let store = db
        .dictionary_store()
        .context("Invalid dictionary table binding")?;

    let service = Arc::new(AddressEnrichmentService::new(config, Arc::new(store)));
    let config = service.config();
    info!(
        archive = %config.archive_path().display(),
        chunk_size = config.chunk_size,
        worker_pool_size = config.worker_pool_size,
        ambiguity_policy = ?config.ambiguity_policy,
        "Loaded enrichment configuration"
    );
    let app = create_router(AppState { service });

    let host = std::env::var("BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3000);
    let addr = format!("{}:{}", host, port);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    db.close().await;
    Ok(())
}
