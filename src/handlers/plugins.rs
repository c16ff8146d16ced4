use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::app::AppState;
use crate::auth::{permissions, Principal};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::plugin::definition::normalize_path;
use crate::plugin::{PluginId, PluginRequest, TaskOutcome};

/// GET /api/plugins - registry listing with declared tasks and routes
pub async fn list(State(state): State<AppState>, Extension(principal): Extension<Principal>) -> ApiResult<Value> {
    principal.require(permissions::PLUGINS_INVOKE)?;
    Ok(ApiResponse::success(json!({
        "plugins": state.plugins.list().await,
        "tasks": state.plugins.tasks().await,
        "routes": state.plugins.routes().await,
    })))
}

/// ANY /api/plugins/:ns/:name/call/*path - dispatch to a service endpoint
///
/// The plugin's status and body are returned as-is, without the envelope.
pub async fn call(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    principal.require(permissions::PLUGINS_INVOKE)?;
    let id = plugin_id(&params)?;
    let path = normalize_path(params.get("path").map(String::as_str).unwrap_or_default());

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidJson(e.to_string()))?
    };

    let request = PluginRequest::new(method, path).with_query(query).with_body(body);
    let response = state.plugins.dispatch(&id, request).await?;

    let status = StatusCode::from_u16(response.status)
        .map_err(|_| ApiError::internal_server_error(format!("Plugin {} returned status {}", id, response.status)))?;
    Ok((status, Json(response.body)).into_response())
}

/// POST /api/plugins/:ns/:name/tasks/:task - run one tick now
pub async fn tick(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((ns, name, task)): Path<(String, String, String)>,
) -> ApiResult<TaskOutcome> {
    principal.require(permissions::PLUGINS_INVOKE)?;
    let id = PluginId::from_parts(&ns, &name)?;
    tracing::info!("Manual tick of {} task {} by {}", id, task, principal.user);
    let outcome = state.plugins.run_task(&id, &task).await?;
    Ok(ApiResponse::success(outcome))
}

fn plugin_id(params: &HashMap<String, String>) -> Result<PluginId, ApiError> {
    match (params.get("ns"), params.get("name")) {
        (Some(ns), Some(name)) => Ok(PluginId::from_parts(ns, name)?),
        _ => Err(ApiError::bad_request("plugin namespace and name are required")),
    }
}
