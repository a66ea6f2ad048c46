//! # palaver-server
//!
//! HTTP backend for the palaver polling chat.
//!
//! This binary provides:
//! - **Action endpoint** (`POST /api`) dispatching every chat action against
//!   the SQLite store
//! - **Session tracking**: the latest login per identity wins, older tokens
//!   are reported as superseded
//! - **Presence sweep** on a timer, so stale online flags clear even when
//!   nobody asks for the user list
//! - **Uploads** for image and file messages
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod blob_store;
mod config;
mod error;
mod handlers;
mod rate_limit;
mod state;
mod typing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use palaver_store::Database;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::state::{AppState, SharedDb};
use crate::typing::TypingRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting palaver server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = database.path() {
        info!(path = %path.display(), "Database ready");
    }
    let db = SharedDb::new(database);

    let blob_store =
        Arc::new(BlobStore::new(config.upload_path.clone(), config.max_upload_size).await?);

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);
    let typing = TypingRegistry::default();

    let app_state = AppState {
        db: db.clone(),
        blob_store: blob_store.clone(),
        typing: typing.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Hourly purge of uploads never attached to a message
    let purge_db = db.clone();
    let upload_grace = config.upload_grace;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let referenced = match purge_db.with(|db| db.referenced_blob_ids()) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "Upload purge skipped");
                    continue;
                }
            };
            if let Err(e) = blob_store.purge_unreferenced(&referenced, upload_grace).await {
                warn!(error = %e, "Upload purge failed");
            }
        }
    });

    // Presence sweep and typing flag cleanup
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match db.with(|db| db.sweep_presence()) {
                Ok(0) => {}
                Ok(n) => debug!(offline = n, "Presence sweep"),
                Err(e) => warn!(error = %e, "Presence sweep failed"),
            }
            typing.purge_expired();
        }
    });

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
