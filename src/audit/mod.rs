//! Audit events for data explorer mutations.
//!
//! Persistence of the audit log is an external concern; the engine only needs
//! an [`AuditSink`] that accepts one event per confirmed change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::query::TableRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "data.insert")]
    Insert,
    #[serde(rename = "data.update")]
    Update,
    #[serde(rename = "data.delete")]
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "data.insert",
            AuditAction::Update => "data.update",
            AuditAction::Delete => "data.delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub schema: String,
    pub table: String,
    pub record_id: String,
    pub actor: Option<String>,
    pub previous: Option<Value>,
    pub current: Option<Value>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, target: &TableRef, record_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            schema: target.schema.clone(),
            table: target.table.clone(),
            record_id: record_id.into(),
            actor: None,
            previous: None,
            current: None,
            at: Utc::now(),
        }
    }

    pub fn actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn previous(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn current(mut self, current: Value) -> Self {
        self.current = Some(current);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("Inserted row in {0} has no id to audit")]
    MissingRecordId(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Keeps events in memory, in emission order
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Emits each event as a structured log record on the `audit` target
#[derive(Debug, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditSink for TracingAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&event).map_err(|e| AuditError::Unavailable(e.to_string()))?;
        tracing::info!(
            target: "audit",
            action = event.action.as_str(),
            schema = %event.schema,
            table = %event.table,
            record_id = %event.record_id,
            actor = event.actor.as_deref().unwrap_or("-"),
            "{}",
            payload
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_serializes_with_dotted_name() {
        assert_eq!(serde_json::to_value(AuditAction::Delete).unwrap(), json!("data.delete"));
        assert_eq!(AuditAction::Update.as_str(), "data.update");
    }

    #[tokio::test]
    async fn memory_log_keeps_emission_order() {
        let log = MemoryAuditLog::new();
        let target = TableRef::new("public", "posts");
        log.record(AuditEvent::new(AuditAction::Insert, &target, "1")).await.unwrap();
        log.record(AuditEvent::new(AuditAction::Delete, &target, "2")).await.unwrap();

        let events = log.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].record_id, "1");
        assert_eq!(log.events_for(AuditAction::Delete).await[0].record_id, "2");
    }
}
