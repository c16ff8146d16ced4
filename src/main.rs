use std::collections::HashMap;
use std::sync::Arc;

use admin_api_rust::app::{router, AppState};
use admin_api_rust::audit::{AuditSink, TracingAuditLog};
use admin_api_rust::config;
use admin_api_rust::database::{DatabaseManager, PgStoreProvider};
use admin_api_rust::plugin::{builtin, config::load_overrides, MemoryStorage, PluginHost};
use admin_api_rust::query::{MemoryStore, SharedStoreProvider, StoreProvider};
use tracing_subscriber::EnvFilter;

/// Environment variables handed to plugins, with the prefix stripped
const PLUGIN_ENV_PREFIX: &str = "PLUGIN_ENV_";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    tracing::info!("Starting admin API in {:?} mode", config.environment);

    let database = std::env::var("DATABASE_URL").is_ok().then(DatabaseManager::new);
    let stores: Arc<dyn StoreProvider> = match &database {
        Some(manager) => Arc::new(PgStoreProvider::new(manager.clone())),
        None => {
            tracing::warn!("DATABASE_URL not set, serving the explorer from an in-memory store");
            Arc::new(SharedStoreProvider::new(Arc::new(MemoryStore::new())))
        }
    };
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditLog);

    let plugins = Arc::new(build_plugin_host().await?);
    for (id, result) in plugins.start_all().await {
        if let Err(e) = result {
            tracing::error!("Plugin {} failed to start: {}", id, e);
        }
    }

    let state = AppState::new(stores, audit, plugins.clone());
    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Admin API listening on http://{}", bind_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    for (id, result) in plugins.shutdown_all().await {
        if let Err(e) = result {
            tracing::warn!("Plugin {} did not shut down cleanly: {}", id, e);
        }
    }
    if let Some(manager) = database {
        manager.close_all().await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn build_plugin_host() -> anyhow::Result<PluginHost> {
    let settings = &config::config().plugins;
    let overrides = match &settings.overrides_path {
        Some(path) => load_overrides(path)?,
        None => HashMap::new(),
    };
    let env: HashMap<String, String> = std::env::vars()
        .filter_map(|(key, value)| key.strip_prefix(PLUGIN_ENV_PREFIX).map(|k| (k.to_string(), value)))
        .collect();

    let host = PluginHost::new(Arc::new(MemoryStorage::new()))
        .with_env(env)
        .with_overrides(overrides)
        .with_task_failure_logging(settings.log_task_failures);

    for plugin in builtin::reference_pair()? {
        host.register(plugin).await?;
    }
    Ok(host)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
