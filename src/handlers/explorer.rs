use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::{permissions, Principal};
use crate::middleware::{ApiResponse, ApiResult};
use crate::query::validate::{parse_descriptor, parse_ids, parse_path_id, parse_row, validate_identifier};
use crate::query::{QueryResult, Row, TableRef};

fn table_ref(schema: &str, table: &str) -> Result<TableRef, crate::query::QueryError> {
    validate_identifier("schema", schema)?;
    validate_identifier("table", table)?;
    Ok(TableRef::new(schema, table))
}

/// POST /api/explorer/query - filtered, sorted, paginated read
///
/// Body: `{schema, table, filters?, sort?, page?, limit?}`. Unknown fields
/// and malformed filter values are rejected with 400.
pub async fn query(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<QueryResult> {
    principal.require(permissions::DATA_READ)?;
    let Json(body) = body?;
    let descriptor = parse_descriptor(&body)?;

    let engine = state.engine_for(&principal).await?;
    let result = engine.query(&descriptor).await?;
    Ok(ApiResponse::success(result))
}

/// POST /api/explorer/:schema/:table/rows - insert one row
pub async fn insert(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((schema, table)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Row> {
    principal.require(permissions::DATA_WRITE)?;
    let Json(body) = body?;
    let target = table_ref(&schema, &table)?;
    let row = parse_row(&body)?;

    let engine = state.engine_for(&principal).await?;
    let created = engine.insert(&target, row, Some(&principal.user)).await?;
    Ok(ApiResponse::created(created))
}

/// PATCH /api/explorer/:schema/:table/rows/:id - update one row
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((schema, table, id)): Path<(String, String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Row> {
    principal.require(permissions::DATA_WRITE)?;
    let Json(body) = body?;
    let target = table_ref(&schema, &table)?;
    let changes = parse_row(&body)?;

    let engine = state.engine_for(&principal).await?;
    let updated = engine.update(&target, &parse_path_id(&id), changes, Some(&principal.user)).await?;
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/explorer/:schema/:table/rows - batch delete, body `{ids: [..]}`
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((schema, table)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    principal.require(permissions::DATA_WRITE)?;
    let Json(body) = body?;
    let target = table_ref(&schema, &table)?;
    let ids = parse_ids(&body)?;

    let engine = state.engine_for(&principal).await?;
    let deleted = engine.batch_delete(&target, &ids, Some(&principal.user)).await?;
    Ok(ApiResponse::success(json!({ "deleted": deleted })))
}
