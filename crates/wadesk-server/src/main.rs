//! # wadesk-server
//!
//! Multi-tenant access layer in front of per-organization WAHA WhatsApp
//! gateways.
//!
//! This binary provides:
//! - **Webhook ingestion** of gateway events into tenant storage, idempotent
//!   per external message id
//! - **REST API** (axum) that resolves the caller's organization and proxies
//!   session, QR, chat and send operations to that organization's gateway
//! - **Daily analytics** maintained atomically on ingest, with reconciliation
//! - **Admin API** for provisioning organizations and replaying dead letters

mod api;
mod auth;
mod config;
mod db;
mod directory;
mod error;
mod gateway;
mod ingest;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use wadesk_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::db::SharedDatabase;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wadesk_server=debug")),
        )
        .init();

    info!("Starting wadesk server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.identity_public_key == [0u8; 32] {
        tracing::warn!("IDENTITY_PUBLIC_KEY is not set, every API token will be rejected");
    }
    info!(
        webhook_url = %config.webhook_url(),
        failure_policy = ?config.failure_policy,
        admin_enabled = config.admin_token.is_some(),
        webhook_secret = config.webhook_secret.is_some(),
        "Gateway integration settings"
    );

    // -----------------------------------------------------------------------
    // 3. Open storage (runs migrations)
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;

    let http_addr = config.http_addr;
    let app_state = AppState {
        db: SharedDatabase::new(db),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
