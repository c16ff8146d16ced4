mod common;

use std::collections::HashSet;

use admin_api_rust::auth::permissions;
use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

fn ids(payload: &Value) -> Vec<u64> {
    payload["data"]["data"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|row| row["id"].as_u64())
        .collect()
}

#[tokio::test]
async fn pagination_reports_total_and_has_more() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;

    let (status, first) = app
        .query(json!({"schema": "public", "table": "users", "page": 1, "limit": 20}))
        .await?;
    assert_eq!(status, StatusCode::OK, "unexpected body: {}", first);
    assert_eq!(first["success"], json!(true));
    assert_eq!(first["data"]["total"], json!(27));
    assert_eq!(first["data"]["hasMore"], json!(true));
    assert_eq!(ids(&first).len(), 20);

    let (_, second) = app
        .query(json!({"schema": "public", "table": "users", "page": 2, "limit": 20}))
        .await?;
    assert_eq!(second["data"]["total"], json!(27));
    assert_eq!(second["data"]["page"], json!(2));
    assert_eq!(second["data"]["hasMore"], json!(false));
    assert_eq!(ids(&second).len(), 7);
    Ok(())
}

#[tokio::test]
async fn defaults_apply_when_page_and_limit_are_omitted() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let (_, payload) = app.query(json!({"schema": "public", "table": "users"})).await?;

    assert_eq!(payload["data"]["page"], json!(1));
    assert_eq!(payload["data"]["limit"], json!(20));
    assert_eq!(ids(&payload).len(), 20);
    Ok(())
}

#[tokio::test]
async fn limit_above_max_is_capped_not_rejected() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let (status, payload) = app
        .query(json!({"schema": "public", "table": "users", "limit": 5000}))
        .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["data"]["limit"], json!(common::MAX_LIMIT));
    assert_eq!(payload["data"]["hasMore"], json!(false));
    Ok(())
}

#[tokio::test]
async fn removing_a_filter_yields_a_superset() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let both = json!([
        {"column": "age", "operator": "gte", "value": 25},
        {"column": "active", "operator": "eq", "value": true}
    ]);
    let one = json!([{"column": "age", "operator": "gte", "value": 25}]);

    let (_, narrow) = app
        .query(json!({"schema": "public", "table": "users", "filters": both, "limit": 100}))
        .await?;
    let (_, wide) = app
        .query(json!({"schema": "public", "table": "users", "filters": one, "limit": 100}))
        .await?;

    let narrow_ids: HashSet<u64> = ids(&narrow).into_iter().collect();
    let wide_ids: HashSet<u64> = ids(&wide).into_iter().collect();
    assert!(!narrow_ids.is_empty());
    assert!(narrow_ids.is_subset(&wide_ids));
    assert!(narrow["data"]["total"].as_u64() < wide["data"]["total"].as_u64());

    // Conjunction: every returned row satisfies both rules
    for row in narrow["data"]["data"].as_array().cloned().unwrap_or_default() {
        assert!(row["age"].as_u64().unwrap_or(0) >= 25);
        assert_eq!(row["active"], json!(true));
    }
    Ok(())
}

#[tokio::test]
async fn is_null_differs_from_eq_null() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;

    let (_, is_null) = app
        .query(json!({
            "schema": "public", "table": "users",
            "filters": [{"column": "email", "operator": "is", "value": null}]
        }))
        .await?;
    assert_eq!(is_null["data"]["total"], json!(9));

    let (status, eq_null) = app
        .query(json!({
            "schema": "public", "table": "users",
            "filters": [{"column": "email", "operator": "eq", "value": null}]
        }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(eq_null["data"]["total"], json!(0));
    assert_eq!(ids(&eq_null), Vec::<u64>::new());
    Ok(())
}

#[tokio::test]
async fn pattern_membership_and_containment_operators() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let filter = |rule: Value| json!({"schema": "public", "table": "users", "filters": [rule], "limit": 100});

    let (_, like) = app.query(filter(json!({"column": "name", "operator": "like", "value": "user1%"}))).await?;
    assert_eq!(like["data"]["total"], json!(10));

    let (_, ilike) = app.query(filter(json!({"column": "name", "operator": "ilike", "value": "USER2_"}))).await?;
    assert_eq!(ilike["data"]["total"], json!(8));

    let (_, within) = app.query(filter(json!({"column": "id", "operator": "in", "value": [1, 2, 999]}))).await?;
    assert_eq!(ids(&within), vec![1, 2]);

    let (_, vip) = app.query(filter(json!({"column": "tags", "operator": "contains", "value": ["vip"]}))).await?;
    assert_eq!(ids(&vip), vec![5, 10, 15, 20, 25]);
    Ok(())
}

#[tokio::test]
async fn sort_descending_orders_rows() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let (_, payload) = app
        .query(json!({
            "schema": "public", "table": "users",
            "sort": {"column": "id", "ascending": false},
            "limit": 3
        }))
        .await?;

    assert_eq!(ids(&payload), vec![27, 26, 25]);
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_rejected_with_400() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let bad_bodies = [
        json!({"table": "users"}),
        json!({"schema": "public", "table": "users", "where": {}}),
        json!({"schema": "public", "table": "users", "page": 0}),
        json!({"schema": "public", "table": "users", "filters": [{"column": "id", "operator": "between", "value": 1}]}),
        json!({"schema": "public", "table": "users", "filters": [{"column": "id", "operator": "in", "value": 1}]}),
        json!({"schema": "public", "table": "users", "filters": [{"column": "email", "operator": "is", "value": "x"}]}),
        json!({"schema": "public; drop", "table": "users"}),
    ];

    for body in bad_bodies {
        let (status, payload) = app.query(body.clone()).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", body, payload);
        assert_eq!(payload["success"], json!(false));
        assert_eq!(payload["code"], json!("VALIDATION_ERROR"));
    }
    Ok(())
}

#[tokio::test]
async fn store_errors_propagate() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;

    let (status, payload) = app.query(json!({"schema": "public", "table": "nope"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(payload["error"].as_str().unwrap_or_default().contains("Unknown table"));

    let (status, _) = app
        .query(json!({
            "schema": "public", "table": "users",
            "filters": [{"column": "missing", "operator": "eq", "value": 1}]
        }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn query_requires_token_and_read_permission() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let body = json!({"schema": "public", "table": "users"});

    let (status, _) = app.send(Method::POST, "/api/explorer/query", None, Some(body.clone())).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::POST, "/api/explorer/query", Some("not-a-jwt"), Some(body.clone()))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let writer = common::token(&[permissions::DATA_WRITE]);
    let (status, payload) = app.send(Method::POST, "/api/explorer/query", Some(&writer), Some(body)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(payload["code"], json!("FORBIDDEN"));
    Ok(())
}

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let app = common::test_app(common::users_store()).await?;
    let (status, payload) = app.send(Method::GET, "/health", None, None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["data"]["status"], json!("ok"));
    assert_eq!(payload["data"]["database"], json!("ok"));
    assert_eq!(payload["data"]["plugins"]["active"], json!(2));
    Ok(())
}
