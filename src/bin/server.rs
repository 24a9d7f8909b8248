//! Medsync development API server
//!
//! An in-memory implementation of the healthcare REST API that the medsync
//! client syncs against. Data lives only as long as the process.
//!
//! # Configuration
//!
//! Environment variables:
//! - `MEDSYNC_PORT`: Port to listen on (default: 8080)
//! - `MEDSYNC_ASSET_VERSION`: Version published on `/version` (default: this crate's version)
//! - `MEDSYNC_SERVER_API_KEY`: When set, `/api` routes require `Authorization: Bearer <key>`
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /version`: Currently deployed client version (no auth required)
//! - `GET|POST /api/{collection}`: List or create entities
//! - `GET|PUT|DELETE /api/{collection}/{id}`: Read, update or delete one entity

use medsync::server::{router, AppState};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Version announced to clients for the update channel
    asset_version: String,
    api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("MEDSYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let asset_version = std::env::var("MEDSYNC_ASSET_VERSION")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let api_key = std::env::var("MEDSYNC_SERVER_API_KEY").ok();

        Self {
            port,
            asset_version,
            api_key,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medsync_server=info,medsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    tracing::info!("Publishing client version {}", config.asset_version);
    if config.api_key.is_some() {
        tracing::info!("API key required for /api routes");
    }

    let state = AppState::new(config.asset_version).with_api_key(config.api_key);
    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
