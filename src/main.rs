use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::Backend;
use services::{
    drive_service::DriveService, local_store::LocalObjectStore, memory_store::MemoryObjectStore,
    object_store::ObjectStore,
};

/// Multipart framing allowance on top of the quota for one upload request.
const UPLOAD_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting drive-store with config: {:?}", cfg);

    // --- Initialize object store backend ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Local => {
            // --- Ensure storage directory exists ---
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }

            let pool = db::connect(&cfg.database_url).await?;
            db::run_migrations(&pool).await?;

            // --- Handle migration mode ---
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }

            Arc::new(LocalObjectStore::new(
                Arc::new(pool),
                cfg.storage_dir.clone(),
                cfg.bucket.clone(),
            ))
        }
        Backend::Memory => {
            if migrate {
                tracing::warn!("--migrate has no effect with the memory backend");
                return Ok(());
            }
            tracing::warn!("Using in-memory object store; data is lost on exit");
            Arc::new(MemoryObjectStore::new())
        }
    };

    // --- Initialize core service ---
    let drive = DriveService::new(store, cfg.drive.clone());

    // --- Build router ---
    let body_limit = cfg
        .drive
        .max_storage_bytes
        .saturating_add(UPLOAD_OVERHEAD_BYTES)
        .try_into()
        .unwrap_or(usize::MAX);
    let app: Router = routes::routes::routes(body_limit).with_state(drive);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
