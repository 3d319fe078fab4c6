use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::{fs, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod admin_routes;
mod analytics;
mod billing;
mod client_routes;
mod client_store;
mod config;
mod db;
mod error;
mod ingest;
mod models;
mod pdf;
mod report_routes;
mod reports;
mod routes;
mod technician_store;
mod ticket_store;

mod api_tests;
mod ingest_tests;

use crate::config::{AppConfig, Cli};
use crate::db::Database;
use crate::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Setup ---
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Load Configuration ---
    let config = AppConfig::load(Cli::parse()).context("Failed to load configuration")?;
    info!(
        "Configuration loaded. Database: {}, reports: {}",
        config.database_path.display(),
        config.reports_dir.display()
    );

    // --- Storage ---
    let db = Database::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path.display()
        )
    })?;
    info!(
        "Database ready (schema version {})",
        db.schema_version().context("Failed to read schema version")?
    );
    fs::create_dir_all(&config.reports_dir).with_context(|| {
        format!(
            "Failed to create reports directory {}",
            config.reports_dir.display()
        )
    })?;

    let addr = config.socket_addr()?;
    let tls = config.tls.clone();
    let state = AppState {
        db: Arc::new(db),
        config: Arc::new(config),
    };
    let app = build_router(state);

    // --- Run Web Server ---
    match tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(
                PathBuf::from(&tls.cert_path),
                PathBuf::from(&tls.key_path),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to load TLS cert/key from {} and {}",
                    tls.cert_path, tls.key_path
                )
            })?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Starting server on http://{}", addr);
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await?;
        }
    }

    Ok(())
}
