#![allow(dead_code)]

use std::sync::Arc;

use admin_api_rust::app::{router, AppState};
use admin_api_rust::audit::MemoryAuditLog;
use admin_api_rust::auth::{generate_jwt, permissions, Claims};
use admin_api_rust::plugin::{builtin, MemoryStorage, PluginHost};
use admin_api_rust::query::{MemoryStore, SharedStoreProvider};
use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const SECRET: &str = "integration-test-secret";
pub const MAX_LIMIT: u32 = 100;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub storage: Arc<MemoryStorage>,
    pub plugins: Arc<PluginHost>,
}

/// 27 users. Every third has no email, ids are 1..=27, age = 20 + id % 10.
pub fn users() -> Vec<Value> {
    (1..=27u64)
        .map(|id| {
            json!({
                "id": id,
                "name": format!("user{:02}", id),
                "age": 20 + id % 10,
                "email": if id % 3 == 0 { Value::Null } else { json!(format!("user{}@example.com", id)) },
                "active": id % 2 == 1,
                "tags": if id % 5 == 0 { json!(["vip", "beta"]) } else { json!(["beta"]) },
            })
        })
        .collect()
}

pub fn users_store() -> MemoryStore {
    MemoryStore::new().with_rows("public", "users", users())
}

pub async fn test_app(store: MemoryStore) -> Result<TestApp> {
    let store = Arc::new(store);
    let audit = Arc::new(MemoryAuditLog::new());
    let storage = Arc::new(MemoryStorage::new());

    let plugins = Arc::new(PluginHost::new(storage.clone()));
    for plugin in builtin::reference_pair()? {
        plugins.register(plugin).await?;
    }
    plugins.start_all().await;

    let state = AppState::new(Arc::new(SharedStoreProvider::new(store.clone())), audit.clone(), plugins.clone())
        .with_max_limit(Some(MAX_LIMIT))
        .with_jwt_secret(SECRET);

    Ok(TestApp { router: router(state), store, audit, storage, plugins })
}

pub fn token(perms: &[&str]) -> String {
    let claims = Claims::new("tester", "acme", perms.iter().map(|p| p.to_string()).collect(), 1);
    generate_jwt(&claims, SECRET).expect("token")
}

pub fn full_token() -> String {
    token(&permissions::ALL)
}

impl TestApp {
    /// Send one request through the router and decode the JSON body
    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok((status, value))
    }

    pub async fn query(&self, body: Value) -> Result<(StatusCode, Value)> {
        self.send(Method::POST, "/api/explorer/query", Some(&full_token()), Some(body)).await
    }
}
