//! Plugin contracts.
//!
//! Both runtimes share [`PluginDefinition`] and the [`Lifecycle`] hooks; the
//! capability hooks differ. [`Plugin`] is the closed union the host matches on.

use async_trait::async_trait;
use axum::http::Method;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::context::{ClientContext, ServiceContext};
use super::mount::MountTarget;
use super::types::{PluginId, PluginMeta, RuntimeKind};

/// Static description shared by every plugin: id, metadata and config defaults
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDefinition {
    pub id: PluginId,
    pub meta: PluginMeta,
    pub defaults: Value,
}

impl PluginDefinition {
    pub fn new(id: PluginId, meta: PluginMeta, defaults: Value) -> Self {
        Self { id, meta, defaults }
    }
}

/// Lifecycle hooks. Every hook is optional; the default is a no-op.
#[async_trait]
pub trait Lifecycle<C: Send + Sync + 'static>: Send + Sync {
    async fn setup(&self, _ctx: &C) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start(&self, _ctx: &C) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _ctx: &C) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self, _ctx: &C) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type TaskFn = Arc<dyn Fn(ServiceContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Task declaration. The cron expression is only carried; timing belongs to
/// the external scheduler.
#[derive(Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub cron: String,
    pub execute: TaskFn,
}

impl ScheduledTask {
    pub fn new<F, Fut>(name: impl Into<String>, cron: impl Into<String>, execute: F) -> Self
    where
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cron: cron.into(),
            execute: Arc::new(move |ctx| execute(ctx).boxed()),
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask").field("name", &self.name).field("cron", &self.cron).finish()
    }
}

/// Five or six whitespace-separated fields
pub fn is_valid_cron(expr: &str) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    matches!(fields.len(), 5 | 6)
        && fields
            .iter()
            .all(|f| f.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-' | '?')))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginRequest {
    pub method: Method,
    /// Path relative to the plugin's mount, always starting with `/`
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl PluginRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: HashMap::new(), body: Value::Null }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginResponse {
    pub status: u16,
    pub body: Value,
}

impl PluginResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

pub type HandlerFn =
    Arc<dyn Fn(ServiceContext, PluginRequest) -> BoxFuture<'static, anyhow::Result<PluginResponse>> + Send + Sync>;

#[derive(Clone)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
    pub handler: HandlerFn,
}

impl Endpoint {
    pub fn new<F, Fut>(method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServiceContext, PluginRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PluginResponse>> + Send + 'static,
    {
        Self {
            method,
            path: normalize_path(&path.into()),
            handler: Arc::new(move |ctx, req| handler(ctx, req).boxed()),
        }
    }

    pub fn get<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServiceContext, PluginRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PluginResponse>> + Send + 'static,
    {
        Self::new(Method::GET, path, handler)
    }

    pub fn post<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServiceContext, PluginRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PluginResponse>> + Send + 'static,
    {
        Self::new(Method::POST, path, handler)
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.path == normalize_path(path)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("method", &self.method).field("path", &self.path).finish()
    }
}

/// Leading slash, no trailing slash (except the root)
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

pub trait ServicePlugin: Lifecycle<ServiceContext> {
    fn definition(&self) -> &PluginDefinition;

    /// Enumerated once, at registration
    fn tasks(&self) -> Vec<ScheduledTask> {
        Vec::new()
    }

    /// Enumerated once, at registration
    fn endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }
}

#[async_trait]
pub trait ClientPlugin: Lifecycle<ClientContext> {
    fn definition(&self) -> &PluginDefinition;

    async fn render(&self, _ctx: &ClientContext, _target: &mut MountTarget) -> anyhow::Result<()> {
        Ok(())
    }

    /// Must undo everything `render` did to the target
    async fn destroy(&self, _ctx: &ClientContext, _target: &mut MountTarget) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub enum Plugin {
    Service(Arc<dyn ServicePlugin>),
    Client(Arc<dyn ClientPlugin>),
}

impl Plugin {
    pub fn service(plugin: impl ServicePlugin + 'static) -> Self {
        Plugin::Service(Arc::new(plugin))
    }

    pub fn client(plugin: impl ClientPlugin + 'static) -> Self {
        Plugin::Client(Arc::new(plugin))
    }

    pub fn definition(&self) -> &PluginDefinition {
        match self {
            Plugin::Service(p) => p.definition(),
            Plugin::Client(p) => p.definition(),
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.definition().id
    }

    pub fn runtime(&self) -> RuntimeKind {
        match self {
            Plugin::Service(_) => RuntimeKind::Service,
            Plugin::Client(_) => RuntimeKind::Client,
        }
    }
}
