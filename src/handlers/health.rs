use axum::extract::State;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::plugin::LifecycleState;

/// GET /health - liveness, store reachability and plugin counts
///
/// Always 200 while the process serves requests; an unreachable store is
/// reported in the body as `"degraded"`.
pub async fn get(State(state): State<AppState>) -> ApiResult<Value> {
    let database = match state.stores.health().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Health check: store unavailable: {}", e);
            "unavailable"
        }
    };

    let plugins = state.plugins.list().await;
    let active = plugins.iter().filter(|p| p.state == LifecycleState::Active).count();

    Ok(ApiResponse::success(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "plugins": { "registered": plugins.len(), "active": active },
    })))
}
