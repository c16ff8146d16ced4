//! Plugin host: registry, lifecycle driver and capability dispatcher.
//!
//! Each registered plugin gets one instance. Lifecycle hooks for an instance
//! run under that instance's lifecycle mutex, so they never overlap. Task ticks,
//! endpoint calls and mounts only read the current state and config, and may
//! run concurrently with each other.

use axum::http::Method;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use super::config::{is_enabled, merge};
use super::context::{BridgeEvent, ClientContext, MountSession, PluginContext, ServiceContext, ServiceRef};
use super::definition::{is_valid_cron, Endpoint, Plugin, PluginRequest, PluginResponse, ScheduledTask};
use super::error::PluginError;
use super::logger::TracingLogger;
use super::mount::MountTarget;
use super::storage::{PluginStorage, ScopedStorage};
use super::types::{LifecycleState, PluginId, PluginMeta, RuntimeKind};

pub const PLUGIN_ROUTE_PREFIX: &str = "/api/plugins";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Setup,
    Start,
    Stop,
    Teardown,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::Setup => "setup",
            Hook::Start => "start",
            Hook::Stop => "stop",
            Hook::Teardown => "teardown",
        }
    }

    fn edge(self) -> (LifecycleState, LifecycleState) {
        match self {
            Hook::Setup => (LifecycleState::Unloaded, LifecycleState::Ready),
            Hook::Start => (LifecycleState::Ready, LifecycleState::Active),
            Hook::Stop => (LifecycleState::Active, LifecycleState::Ready),
            Hook::Teardown => (LifecycleState::Ready, LifecycleState::Unloaded),
        }
    }
}

/// Guarded by the instance lifecycle mutex
#[derive(Debug, Default)]
struct LifecycleFlags {
    setup_attempted: bool,
    teardown_attempted: bool,
}

struct Instance {
    plugin: Plugin,
    lifecycle: Mutex<LifecycleFlags>,
    state: RwLock<LifecycleState>,
    config: RwLock<Value>,
    tasks: Vec<ScheduledTask>,
    endpoints: Vec<Endpoint>,
    mounts: Mutex<HashMap<String, MountSession>>,
}

impl Instance {
    fn id(&self) -> &PluginId {
        self.plugin.id()
    }

    async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }
}

/// Reported on the host error channel when a task tick fails
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub plugin: PluginId,
    pub task: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NotActive,
}

/// Result of one tick. Failures are values here; the scheduler keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Skipped { reason: SkipReason },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    pub plugin: PluginId,
    pub name: String,
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDescriptor {
    pub plugin: PluginId,
    pub method: String,
    pub path: String,
    /// Where the host's HTTP surface exposes this endpoint
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub id: PluginId,
    pub runtime: RuntimeKind,
    pub meta: PluginMeta,
    pub state: LifecycleState,
    pub enabled: bool,
    pub config: Value,
    pub tasks: Vec<String>,
    pub endpoints: Vec<String>,
}

pub fn mount_base(id: &PluginId) -> String {
    format!("{}/{}/{}/call", PLUGIN_ROUTE_PREFIX, id.namespace(), id.name())
}

pub struct PluginHost {
    instances: RwLock<BTreeMap<PluginId, Arc<Instance>>>,
    storage: Arc<dyn PluginStorage>,
    env: Arc<HashMap<String, String>>,
    secrets: HashMap<PluginId, Arc<HashMap<String, String>>>,
    bindings: HashMap<PluginId, Arc<HashMap<String, Value>>>,
    overrides: HashMap<PluginId, Value>,
    failures: broadcast::Sender<TaskFailure>,
    bridge: broadcast::Sender<BridgeEvent>,
    log_task_failures: bool,
}

impl PluginHost {
    pub fn new(storage: Arc<dyn PluginStorage>) -> Self {
        let (failures, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (bridge, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            instances: RwLock::new(BTreeMap::new()),
            storage,
            env: Arc::new(HashMap::new()),
            secrets: HashMap::new(),
            bindings: HashMap::new(),
            overrides: HashMap::new(),
            failures,
            bridge,
            log_task_failures: true,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Secrets are only ever placed in service contexts
    pub fn with_secrets(mut self, id: PluginId, secrets: HashMap<String, String>) -> Self {
        self.secrets.insert(id, Arc::new(secrets));
        self
    }

    pub fn with_bindings(mut self, id: PluginId, bindings: HashMap<String, Value>) -> Self {
        self.bindings.insert(id, Arc::new(bindings));
        self
    }

    /// Overrides applied at registration when the caller supplies none
    pub fn with_overrides(mut self, overrides: HashMap<PluginId, Value>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_task_failure_logging(mut self, enabled: bool) -> Self {
        self.log_task_failures = enabled;
        self
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<TaskFailure> {
        self.failures.subscribe()
    }

    pub fn subscribe_bridge(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bridge.subscribe()
    }

    pub async fn register(&self, plugin: Plugin) -> Result<(), PluginError> {
        self.register_with(plugin, None).await
    }

    /// Register a plugin in the UNLOADED state with `defaults` merged with
    /// `overrides`. Tasks and endpoints are enumerated here, once.
    pub async fn register_with(&self, plugin: Plugin, overrides: Option<Value>) -> Result<(), PluginError> {
        let id = plugin.id().clone();
        let overrides = overrides.or_else(|| self.overrides.get(&id).cloned());
        let config = merge(&plugin.definition().defaults, overrides.as_ref())?;

        let (tasks, endpoints) = match &plugin {
            Plugin::Service(p) => (p.tasks(), p.endpoints()),
            Plugin::Client(_) => (Vec::new(), Vec::new()),
        };

        let mut task_names = HashSet::new();
        for task in &tasks {
            if !is_valid_cron(&task.cron) {
                return Err(PluginError::InvalidCron {
                    plugin: id.to_string(),
                    task: task.name.clone(),
                    cron: task.cron.clone(),
                });
            }
            if !task_names.insert(task.name.as_str()) {
                return Err(PluginError::Config(format!("{}: task '{}' declared more than once", id, task.name)));
            }
        }
        for (i, endpoint) in endpoints.iter().enumerate() {
            if endpoints[..i].iter().any(|e| e.method == endpoint.method && e.path == endpoint.path) {
                return Err(PluginError::DuplicateRoute {
                    plugin: id.to_string(),
                    method: endpoint.method.to_string(),
                    path: endpoint.path.clone(),
                });
            }
        }

        let mut instances = self.instances.write().await;
        if instances.contains_key(&id) {
            return Err(PluginError::AlreadyRegistered(id.to_string()));
        }

        tracing::info!(
            "Registered {} plugin {} ({} tasks, {} endpoints)",
            plugin.runtime(),
            id,
            tasks.len(),
            endpoints.len()
        );
        instances.insert(
            id,
            Arc::new(Instance {
                plugin,
                lifecycle: Mutex::new(LifecycleFlags::default()),
                state: RwLock::new(LifecycleState::Unloaded),
                config: RwLock::new(config),
                tasks,
                endpoints,
                mounts: Mutex::new(HashMap::new()),
            }),
        );
        Ok(())
    }

    async fn instance(&self, id: &PluginId) -> Result<Arc<Instance>, PluginError> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    async fn common_context(&self, inst: &Instance) -> PluginContext {
        let id = inst.id().clone();
        PluginContext {
            config: inst.config.read().await.clone(),
            logger: Arc::new(TracingLogger::new(&id)),
            storage: Arc::new(ScopedStorage::new(self.storage.clone(), &id)),
            env: self.env.clone(),
            runtime: inst.plugin.runtime(),
            id,
        }
    }

    async fn service_context(&self, inst: &Instance) -> ServiceContext {
        let common = self.common_context(inst).await;
        let bindings = self.bindings.get(inst.id()).cloned().unwrap_or_default();
        let secrets = self.secrets.get(inst.id()).cloned().unwrap_or_default();
        ServiceContext::new(common, bindings, secrets)
    }

    async fn client_context(&self, inst: &Instance, mount: Option<MountSession>) -> ClientContext {
        let common = self.common_context(inst).await;
        let services = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.plugin.runtime() == RuntimeKind::Service)
            .map(|i| ServiceRef { id: i.id().clone(), base_path: mount_base(i.id()) })
            .collect();
        ClientContext::new(common, Arc::new(services), self.bridge.clone(), mount)
    }

    async fn call_hook(&self, inst: &Instance, hook: Hook) -> anyhow::Result<()> {
        match &inst.plugin {
            Plugin::Service(p) => {
                let ctx = self.service_context(inst).await;
                match hook {
                    Hook::Setup => p.setup(&ctx).await,
                    Hook::Start => p.start(&ctx).await,
                    Hook::Stop => p.stop(&ctx).await,
                    Hook::Teardown => p.teardown(&ctx).await,
                }
            }
            Plugin::Client(p) => {
                let ctx = self.client_context(inst, None).await;
                match hook {
                    Hook::Setup => p.setup(&ctx).await,
                    Hook::Start => p.start(&ctx).await,
                    Hook::Stop => p.stop(&ctx).await,
                    Hook::Teardown => p.teardown(&ctx).await,
                }
            }
        }
    }

    /// Run one hook and advance the state. Caller holds the lifecycle lock.
    async fn transition(&self, inst: &Instance, flags: &mut LifecycleFlags, hook: Hook) -> Result<(), PluginError> {
        let (from, to) = hook.edge();
        let current = inst.state().await;
        let allowed = current == from
            && match hook {
                Hook::Setup => !flags.setup_attempted,
                Hook::Teardown => !flags.teardown_attempted,
                Hook::Start | Hook::Stop => true,
            };
        if !allowed {
            return Err(PluginError::InvalidTransition {
                plugin: inst.id().to_string(),
                hook: hook.as_str(),
                state: current,
            });
        }

        // A failed setup or teardown still counts as the one allowed call
        match hook {
            Hook::Setup => flags.setup_attempted = true,
            Hook::Teardown => flags.teardown_attempted = true,
            Hook::Start | Hook::Stop => {}
        }

        match self.call_hook(inst, hook).await {
            Ok(()) => {
                *inst.state.write().await = to;
                tracing::info!("Plugin {} {}: {} -> {}", inst.id(), hook.as_str(), from, to);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Plugin {} {} failed, staying {}: {:#}", inst.id(), hook.as_str(), from, e);
                Err(PluginError::hook(inst.id(), hook.as_str(), &e))
            }
        }
    }

    async fn lifecycle(&self, id: &PluginId, hook: Hook) -> Result<(), PluginError> {
        let inst = self.instance(id).await?;
        let mut flags = inst.lifecycle.lock().await;
        self.transition(&inst, &mut flags, hook).await
    }

    pub async fn setup(&self, id: &PluginId) -> Result<(), PluginError> {
        self.lifecycle(id, Hook::Setup).await
    }

    pub async fn start(&self, id: &PluginId) -> Result<(), PluginError> {
        self.lifecycle(id, Hook::Start).await
    }

    pub async fn stop(&self, id: &PluginId) -> Result<(), PluginError> {
        self.lifecycle(id, Hook::Stop).await
    }

    pub async fn teardown(&self, id: &PluginId) -> Result<(), PluginError> {
        self.lifecycle(id, Hook::Teardown).await
    }

    /// Apply new overrides. An active plugin is stopped, reconfigured and
    /// started again under a single hold of its lifecycle lock.
    pub async fn reload(&self, id: &PluginId, overrides: Option<Value>) -> Result<Value, PluginError> {
        let inst = self.instance(id).await?;
        let mut flags = inst.lifecycle.lock().await;
        let config = merge(&inst.plugin.definition().defaults, overrides.as_ref())?;

        if inst.state().await != LifecycleState::Active {
            *inst.config.write().await = config.clone();
            tracing::info!("Plugin {} reconfigured", id);
            return Ok(config);
        }

        self.transition(&inst, &mut flags, Hook::Stop).await?;
        *inst.config.write().await = config.clone();
        self.transition(&inst, &mut flags, Hook::Start).await?;
        tracing::info!("Plugin {} reloaded", id);
        Ok(config)
    }

    /// Bring every plugin to ACTIVE. Plugins proceed concurrently; each one's
    /// hooks stay serialized.
    pub async fn start_all(&self) -> Vec<(PluginId, Result<(), PluginError>)> {
        let instances: Vec<Arc<Instance>> = self.instances.read().await.values().cloned().collect();
        join_all(instances.into_iter().map(|inst| async move {
            let mut flags = inst.lifecycle.lock().await;
            let mut result = Ok(());
            if inst.state().await == LifecycleState::Unloaded && !flags.setup_attempted {
                result = self.transition(&inst, &mut flags, Hook::Setup).await;
            }
            if result.is_ok() && inst.state().await == LifecycleState::Ready {
                result = self.transition(&inst, &mut flags, Hook::Start).await;
            }
            // A plugin whose setup already failed stays UNLOADED for good
            if result.is_ok() {
                let state = inst.state().await;
                if state != LifecycleState::Active {
                    let plugin = inst.id().to_string();
                    result = Err(PluginError::InvalidTransition { plugin, hook: "start", state });
                }
            }
            (inst.id().clone(), result)
        }))
        .await
    }

    /// Stop and tear down every plugin
    pub async fn shutdown_all(&self) -> Vec<(PluginId, Result<(), PluginError>)> {
        let instances: Vec<Arc<Instance>> = self.instances.read().await.values().cloned().collect();
        join_all(instances.into_iter().map(|inst| async move {
            let mut flags = inst.lifecycle.lock().await;
            let mut result = Ok(());
            if inst.state().await == LifecycleState::Active {
                result = self.transition(&inst, &mut flags, Hook::Stop).await;
            }
            if result.is_ok() && inst.state().await == LifecycleState::Ready && !flags.teardown_attempted {
                result = self.transition(&inst, &mut flags, Hook::Teardown).await;
            }
            (inst.id().clone(), result)
        }))
        .await
    }

    fn expect_runtime(inst: &Instance, expected: RuntimeKind) -> Result<(), PluginError> {
        let actual = inst.plugin.runtime();
        if actual == expected {
            Ok(())
        } else {
            Err(PluginError::WrongRuntime { plugin: inst.id().to_string(), expected, actual })
        }
    }

    /// One tick of a task. Hook failures and panics come back as
    /// `TaskOutcome::Failed` and are published on the failure channel.
    pub async fn run_task(&self, id: &PluginId, task: &str) -> Result<TaskOutcome, PluginError> {
        let inst = self.instance(id).await?;
        Self::expect_runtime(&inst, RuntimeKind::Service)?;
        let task = inst
            .tasks
            .iter()
            .find(|t| t.name == task)
            .cloned()
            .ok_or_else(|| PluginError::UnknownTask { plugin: id.to_string(), task: task.to_string() })?;

        let state = inst.state().await;
        if state != LifecycleState::Active {
            tracing::debug!("Skipping task {} of {}: plugin is {}", task.name, id, state);
            return Ok(TaskOutcome::Skipped { reason: SkipReason::NotActive });
        }

        let ctx = self.service_context(&inst).await;
        if !ctx.enabled() {
            tracing::debug!("Skipping task {} of {}: plugin is disabled", task.name, id);
            return Ok(TaskOutcome::Skipped { reason: SkipReason::Disabled });
        }

        let outcome = match tokio::spawn((task.execute)(ctx)).await {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => TaskOutcome::Failed { message: format!("{:#}", e) },
            Err(join) => TaskOutcome::Failed { message: format!("task panicked: {}", join) },
        };

        if let TaskOutcome::Failed { message } = &outcome {
            self.report_failure(id, &task.name, message);
        } else {
            tracing::debug!("Task {} of {} completed", task.name, id);
        }
        Ok(outcome)
    }

    fn report_failure(&self, id: &PluginId, task: &str, message: &str) {
        if self.log_task_failures {
            tracing::error!("Task {} of {} failed: {}", task, id, message);
        }
        let _ = self.failures.send(TaskFailure {
            plugin: id.clone(),
            task: task.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    /// Invoke the single endpoint matching the request and return its
    /// response untouched.
    pub async fn dispatch(&self, id: &PluginId, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        let inst = self.instance(id).await?;
        Self::expect_runtime(&inst, RuntimeKind::Service)?;

        let state = inst.state().await;
        if state != LifecycleState::Active {
            return Err(PluginError::NotActive { plugin: id.to_string(), state });
        }

        // Registration rejects duplicate (method, path) pairs
        let endpoint = inst
            .endpoints
            .iter()
            .find(|e| e.matches(&request.method, &request.path))
            .ok_or_else(|| PluginError::NoRoute {
                plugin: id.to_string(),
                method: request.method.to_string(),
                path: request.path.clone(),
            })?;

        let ctx = self.service_context(&inst).await;
        if !ctx.enabled() {
            return Err(PluginError::Disabled(id.to_string()));
        }

        let label = format!("endpoint {} {}", endpoint.method, endpoint.path);
        tracing::debug!("Dispatching {} to {}", label, id);
        let response = (endpoint.handler)(ctx, request)
            .await
            .map_err(|e| PluginError::hook(id, &label, &e))?;
        // Anything outside 100..=999 cannot be sent as an HTTP status
        if !(100..=999).contains(&response.status) {
            let err = anyhow::anyhow!("handler returned invalid HTTP status {}", response.status);
            tracing::error!("Plugin {} {}: {:#}", id, label, err);
            return Err(PluginError::hook(id, label, &err));
        }
        Ok(response)
    }

    /// Mount a client plugin into `target`. On failure the target is cleared.
    pub async fn render(&self, id: &PluginId, target: &mut MountTarget) -> Result<(), PluginError> {
        let inst = self.instance(id).await?;
        let plugin = match &inst.plugin {
            Plugin::Client(p) => p.clone(),
            Plugin::Service(_) => {
                return Err(PluginError::WrongRuntime {
                    plugin: id.to_string(),
                    expected: RuntimeKind::Client,
                    actual: RuntimeKind::Service,
                })
            }
        };

        let state = inst.state().await;
        if state != LifecycleState::Active {
            return Err(PluginError::NotActive { plugin: id.to_string(), state });
        }

        if !is_enabled(&*inst.config.read().await) {
            // A disabled plugin leaves no session and no output behind
            let previous = inst.mounts.lock().await.remove(target.id());
            if previous.is_some() {
                let ctx = self.client_context(&inst, previous).await;
                if let Err(e) = plugin.destroy(&ctx, target).await {
                    tracing::warn!("Destroy of disabled plugin {} in {} failed: {:#}", id, target.id(), e);
                }
            }
            target.clear();
            tracing::debug!("Plugin {} is disabled, rendering nothing into {}", id, target.id());
            return Ok(());
        }

        let session = inst
            .mounts
            .lock()
            .await
            .entry(target.id().to_string())
            .or_insert_with(|| MountSession { session_id: Uuid::new_v4(), target: target.id().to_string() })
            .clone();
        let ctx = self.client_context(&inst, Some(session)).await;

        match plugin.render(&ctx, target).await {
            Ok(()) => Ok(()),
            Err(e) => {
                target.clear();
                inst.mounts.lock().await.remove(target.id());
                tracing::error!("Render of {} into {} failed, target cleared: {:#}", id, target.id(), e);
                Err(PluginError::hook(id, "render", &e))
            }
        }
    }

    /// Unmount. Whatever the plugin does, the target ends up empty.
    pub async fn destroy(&self, id: &PluginId, target: &mut MountTarget) -> Result<(), PluginError> {
        let inst = self.instance(id).await?;
        let plugin = match &inst.plugin {
            Plugin::Client(p) => p.clone(),
            Plugin::Service(_) => {
                return Err(PluginError::WrongRuntime {
                    plugin: id.to_string(),
                    expected: RuntimeKind::Client,
                    actual: RuntimeKind::Service,
                })
            }
        };

        let session = inst.mounts.lock().await.remove(target.id());
        let ctx = self.client_context(&inst, session).await;
        let result = plugin.destroy(&ctx, target).await;

        if !target.is_empty() {
            tracing::warn!("Plugin {} left content in {} after destroy; clearing", id, target.id());
            target.clear();
        }
        result.map_err(|e| PluginError::hook(id, "destroy", &e))
    }

    pub async fn state(&self, id: &PluginId) -> Result<LifecycleState, PluginError> {
        Ok(self.instance(id).await?.state().await)
    }

    pub async fn config(&self, id: &PluginId) -> Result<Value, PluginError> {
        Ok(self.instance(id).await?.config.read().await.clone())
    }

    pub async fn contains(&self, id: &PluginId) -> bool {
        self.instances.read().await.contains_key(id)
    }

    /// Every declared task, for the external scheduler
    pub async fn tasks(&self) -> Vec<TaskDescriptor> {
        self.instances
            .read()
            .await
            .values()
            .flat_map(|inst| {
                inst.tasks.iter().map(|t| TaskDescriptor {
                    plugin: inst.id().clone(),
                    name: t.name.clone(),
                    cron: t.cron.clone(),
                })
            })
            .collect()
    }

    /// Every declared endpoint, for the external router
    pub async fn routes(&self) -> Vec<RouteDescriptor> {
        self.instances
            .read()
            .await
            .values()
            .flat_map(|inst| {
                inst.endpoints.iter().map(|e| RouteDescriptor {
                    plugin: inst.id().clone(),
                    method: e.method.to_string(),
                    path: e.path.clone(),
                    mount_path: format!("{}{}", mount_base(inst.id()), e.path),
                })
            })
            .collect()
    }

    pub async fn list(&self) -> Vec<PluginSummary> {
        let instances: Vec<Arc<Instance>> = self.instances.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(instances.len());
        for inst in instances {
            let config = inst.config.read().await.clone();
            summaries.push(PluginSummary {
                id: inst.id().clone(),
                runtime: inst.plugin.runtime(),
                meta: inst.plugin.definition().meta.clone(),
                state: inst.state().await,
                enabled: is_enabled(&config),
                config,
                tasks: inst.tasks.iter().map(|t| t.name.clone()).collect(),
                endpoints: inst.endpoints.iter().map(|e| format!("{} {}", e.method, e.path)).collect(),
            });
        }
        summaries
    }
}

/// Parse the HTTP method of an inbound plugin call
pub fn parse_method(raw: &str) -> Option<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).ok()
}
