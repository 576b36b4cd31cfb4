use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{CACHE_SHARDS, CacheBackend, ServerConfig};
use crate::http::routes::{AppState, router};
use crate::patch::cache::{LookupCache, MemoryCache, SqliteCache};
use crate::patch::catalog::{PatchCatalog, SqliteCatalog};
use crate::patch::error::StorageError;
use crate::patch::lookup::LookupService;
use crate::patch::publish::PublishService;

/// Open the catalog and cache and wire both services to them
pub fn build_state(config: &ServerConfig) -> Result<AppState, StorageError> {
    let catalog: Arc<dyn PatchCatalog> = Arc::new(SqliteCatalog::new(&config.db_path)?);

    let cache: Arc<dyn LookupCache> = match config.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(CACHE_SHARDS)),
        CacheBackend::Sqlite => Arc::new(SqliteCache::new(&config.db_path)?),
    };
    info!("Using {:?} lookup cache", config.cache_backend);

    if config.secret.as_deref().is_none_or(str::is_empty) {
        warn!("No publish secret configured, every publish will be rejected");
    }

    Ok(AppState {
        lookup: Arc::new(LookupService::new(catalog.clone(), cache.clone())),
        publish: Arc::new(PublishService::new(
            catalog,
            cache.clone(),
            config.secret.clone(),
        )),
        cache,
    })
}

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let state = build_state(&config)?;
    let cache = Arc::clone(&state.cache);

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = cache.invalidate_all() {
        warn!("Failed to clear lookup cache on shutdown: {}", e);
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
