use axum::{
    middleware,
    routing::{any, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::audit::AuditSink;
use crate::auth::Principal;
use crate::config;
use crate::error::ApiError;
use crate::handlers::{explorer, health, plugins};
use crate::middleware::jwt_auth_middleware;
use crate::plugin::PluginHost;
use crate::query::{QueryEngine, StoreProvider};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub stores: Arc<dyn StoreProvider>,
    pub audit: Arc<dyn AuditSink>,
    pub plugins: Arc<PluginHost>,
    pub max_limit: Option<u32>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    /// State with limits and secret taken from the global config
    pub fn new(stores: Arc<dyn StoreProvider>, audit: Arc<dyn AuditSink>, plugins: Arc<PluginHost>) -> Self {
        let config = config::config();
        Self {
            stores,
            audit,
            plugins,
            max_limit: config.query.max_limit,
            jwt_secret: Arc::from(config.security.jwt_secret.as_str()),
        }
    }

    pub fn with_max_limit(mut self, max_limit: Option<u32>) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn with_jwt_secret(mut self, secret: impl AsRef<str>) -> Self {
        self.jwt_secret = Arc::from(secret.as_ref());
        self
    }

    /// Engine over the caller's tenant store
    pub async fn engine_for(&self, principal: &Principal) -> Result<QueryEngine, ApiError> {
        let store = self.stores.store_for(&principal.tenant).await?;
        Ok(QueryEngine::new(store, self.audit.clone()).with_max_limit(self.max_limit))
    }
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        // Public
        .route("/health", get(health::get))
        // Protected API
        .merge(protected_routes(state.clone()))
        .layer(CorsLayer::permissive());

    let router = if config::config().api.enable_request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };
    router.with_state(state)
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Data explorer
        .route("/api/explorer/query", post(explorer::query))
        .route(
            "/api/explorer/:schema/:table/rows",
            post(explorer::insert).delete(explorer::batch_delete),
        )
        .route("/api/explorer/:schema/:table/rows/:id", patch(explorer::update))
        // Plugins
        .route("/api/plugins", get(plugins::list))
        .route("/api/plugins/:ns/:name/call", any(plugins::call))
        .route("/api/plugins/:ns/:name/call/*path", any(plugins::call))
        .route("/api/plugins/:ns/:name/tasks/:task", post(plugins::tick))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}
