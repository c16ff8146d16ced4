//! Per-invocation contexts built by the host.
//!
//! A context is a cheap bundle of `Arc`s. Plugins receive it by reference for
//! lifecycle and render hooks, and by value for tasks and endpoints so the
//! returned future can own it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::config::is_enabled;
use super::error::PluginError;
use super::logger::PluginLogger;
use super::storage::PluginStorage;
use super::types::{PluginId, RuntimeKind};

#[derive(Clone)]
pub struct PluginContext {
    pub id: PluginId,
    pub config: Value,
    pub logger: Arc<dyn PluginLogger>,
    pub storage: Arc<dyn PluginStorage>,
    pub env: Arc<HashMap<String, String>>,
    pub runtime: RuntimeKind,
}

impl PluginContext {
    pub fn enabled(&self) -> bool {
        is_enabled(&self.config)
    }

    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, PluginError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| PluginError::Config(format!("{}: {}", self.id, e)))
    }
}

#[derive(Clone)]
pub struct ServiceContext {
    common: PluginContext,
    pub bindings: Arc<HashMap<String, Value>>,
    pub secrets: Arc<HashMap<String, String>>,
}

impl ServiceContext {
    pub fn new(
        common: PluginContext,
        bindings: Arc<HashMap<String, Value>>,
        secrets: Arc<HashMap<String, String>>,
    ) -> Self {
        Self { common, bindings, secrets }
    }

    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(String::as_str)
    }
}

impl Deref for ServiceContext {
    type Target = PluginContext;

    fn deref(&self) -> &PluginContext {
        &self.common
    }
}

/// A service plugin a client may talk to through the host's HTTP surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRef {
    pub id: PluginId,
    pub base_path: String,
}

/// Message exchanged between client plugins on the host bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeEvent {
    pub source: PluginId,
    pub topic: String,
    pub payload: Value,
}

/// Identity of one render/destroy session on a mount target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSession {
    pub session_id: Uuid,
    pub target: String,
}

#[derive(Clone)]
pub struct ClientContext {
    common: PluginContext,
    pub services: Arc<Vec<ServiceRef>>,
    pub bridge: broadcast::Sender<BridgeEvent>,
    pub mount: Option<MountSession>,
}

impl ClientContext {
    pub fn new(
        common: PluginContext,
        services: Arc<Vec<ServiceRef>>,
        bridge: broadcast::Sender<BridgeEvent>,
        mount: Option<MountSession>,
    ) -> Self {
        Self { common, services, bridge, mount }
    }

    /// Publish on the bridge. Having no listeners is not an error.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) {
        let _ = self.bridge.send(BridgeEvent { source: self.common.id.clone(), topic: topic.into(), payload });
    }

    pub fn service(&self, id: &str) -> Option<&ServiceRef> {
        self.services.iter().find(|s| s.id.as_str() == id)
    }
}

impl Deref for ClientContext {
    type Target = PluginContext;

    fn deref(&self) -> &PluginContext {
        &self.common
    }
}
