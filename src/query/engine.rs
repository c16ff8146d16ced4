use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::error::{QueryError, StoreError};
use super::pagination::Pagination;
use super::predicate::Conjunction;
use super::store::{RecordStore, SelectRequest};
use super::types::{id_to_string, QueryDescriptor, QueryResult, Row, TableRef};
use crate::audit::{AuditAction, AuditError, AuditEvent, AuditSink};

/// Stateless query engine over a record store.
///
/// Reads translate a descriptor into one `SelectRequest`; mutations emit one
/// audit event per confirmed row change. Nothing is retried.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    max_limit: Option<u32>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RecordStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit, max_limit: None }
    }

    pub fn with_max_limit(mut self, max_limit: Option<u32>) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub async fn query(&self, descriptor: &QueryDescriptor) -> Result<QueryResult, QueryError> {
        if descriptor.schema.trim().is_empty() {
            return Err(QueryError::validation("schema is required"));
        }
        if descriptor.table.trim().is_empty() {
            return Err(QueryError::validation("table is required"));
        }

        let pagination = Pagination::resolve(descriptor.page, descriptor.limit, self.max_limit)?;
        let request = SelectRequest {
            target: descriptor.target(),
            predicate: Conjunction::fold(&descriptor.filters)?,
            order: descriptor.sort.clone(),
            range: pagination.range(),
        };

        if crate::config::CONFIG.query.debug_logging {
            tracing::debug!(
                "Query {} filters={:?} order={:?} range={:?}",
                request.target,
                request.predicate.predicates(),
                request.order,
                request.range
            );
        }

        let started = Instant::now();
        let response = self.store.select(&request).await?;
        let total = response.count.ok_or(StoreError::MissingCount)?;

        tracing::debug!(
            "Query {} returned {} of {} rows in {:?}",
            request.target,
            response.data.len(),
            total,
            started.elapsed()
        );

        Ok(QueryResult {
            data: response.data,
            total,
            page: pagination.page,
            limit: pagination.limit,
            has_more: pagination.has_more(total),
        })
    }

    pub async fn insert(&self, target: &TableRef, values: Row, actor: Option<&str>) -> Result<Row, QueryError> {
        if values.is_empty() {
            return Err(QueryError::validation("insert requires at least one column"));
        }
        let row = self.store.insert(target, values).await?;

        let record_id = match row.get(super::types::ID_COLUMN) {
            Some(id) if !id.is_null() => id_to_string(id),
            _ => {
                tracing::error!("Insert into {} returned a row without an id", target);
                return Err(AuditError::MissingRecordId(target.to_string()).into());
            }
        };
        self.audit
            .record(
                AuditEvent::new(AuditAction::Insert, target, record_id)
                    .actor(actor)
                    .current(Value::Object(row.clone())),
            )
            .await?;
        Ok(row)
    }

    pub async fn update(
        &self,
        target: &TableRef,
        id: &Value,
        changes: Row,
        actor: Option<&str>,
    ) -> Result<Row, QueryError> {
        if changes.is_empty() {
            return Err(QueryError::validation("update requires at least one column"));
        }
        let updated = self.store.update(target, id, changes).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::Update, target, id_to_string(id))
                    .actor(actor)
                    .previous(Value::Object(updated.previous))
                    .current(Value::Object(updated.current.clone())),
            )
            .await?;
        Ok(updated.current)
    }

    /// Delete ids one at a time. Each confirmed delete gets its audit event
    /// before the next id is attempted; any failure fails the whole batch.
    pub async fn batch_delete(&self, target: &TableRef, ids: &[Value], actor: Option<&str>) -> Result<usize, QueryError> {
        let mut failed = Vec::new();
        let mut first_error: Option<StoreError> = None;
        let mut deleted = 0;

        for id in ids {
            match self.store.delete(target, id).await {
                Ok(()) => {
                    deleted += 1;
                    self.audit
                        .record(AuditEvent::new(AuditAction::Delete, target, id_to_string(id)).actor(actor))
                        .await?;
                }
                Err(e) => {
                    tracing::warn!("Delete of {} id {} failed: {}", target, id_to_string(id), e);
                    failed.push(id_to_string(id));
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(source) => Err(QueryError::BatchDelete { failed, source }),
            None => {
                tracing::info!("Deleted {} rows from {}", deleted, target);
                Ok(deleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::query::memory::MemoryStore;
    use crate::query::store::SelectResponse;
    use crate::query::types::FilterOp;
    use crate::query::UpdatedRow;
    use async_trait::async_trait;
    use serde_json::json;

    struct CountlessStore;

    #[async_trait]
    impl RecordStore for CountlessStore {
        async fn select(&self, _request: &SelectRequest) -> Result<SelectResponse, StoreError> {
            Ok(SelectResponse { data: vec![], count: None })
        }
        async fn insert(&self, _t: &TableRef, v: Row) -> Result<Row, StoreError> {
            Ok(v)
        }
        async fn update(&self, _t: &TableRef, _id: &Value, c: Row) -> Result<UpdatedRow, StoreError> {
            Ok(UpdatedRow { previous: c.clone(), current: c })
        }
        async fn delete(&self, _t: &TableRef, _id: &Value) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn engine(store: MemoryStore) -> (QueryEngine, Arc<MemoryAuditLog>) {
        let audit = Arc::new(MemoryAuditLog::new());
        (QueryEngine::new(Arc::new(store), audit.clone()), audit)
    }

    #[tokio::test]
    async fn insert_without_returned_id_is_not_audited_blank() {
        let audit = Arc::new(MemoryAuditLog::new());
        let engine = QueryEngine::new(Arc::new(CountlessStore), audit.clone());
        let target = TableRef::new("public", "posts");

        let values = json!({"title": "hi"}).as_object().cloned().unwrap();
        let err = engine.insert(&target, values, None).await.unwrap_err();
        assert!(matches!(err, QueryError::Audit(AuditError::MissingRecordId(ref t)) if t == "public.posts"));
        assert!(audit.events().await.is_empty());
    }

    #[tokio::test]
    async fn missing_schema_or_table_is_validation_error() {
        let (engine, _) = engine(MemoryStore::new());
        let err = engine.query(&QueryDescriptor::new("", "posts")).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
        let err = engine.query(&QueryDescriptor::new("public", " ")).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_count_is_an_error_not_zero() {
        let engine = QueryEngine::new(Arc::new(CountlessStore), Arc::new(MemoryAuditLog::new()));
        let err = engine.query(&QueryDescriptor::new("public", "posts")).await.unwrap_err();
        assert!(matches!(err, QueryError::Store(StoreError::MissingCount)));
    }

    #[tokio::test]
    async fn query_does_not_mutate_descriptor() {
        let store = MemoryStore::new().with_rows("public", "posts", vec![json!({"id": 1, "status": "draft"})]);
        let (engine, _) = engine(store);
        let descriptor = QueryDescriptor::new("public", "posts").filter("status", FilterOp::Eq, json!("draft"));
        let before = descriptor.clone();
        engine.query(&descriptor).await.unwrap();
        assert_eq!(descriptor, before);
    }

    #[tokio::test]
    async fn capped_limit_is_reported_in_result() {
        let rows = (1..=5).map(|i| json!({"id": i})).collect();
        let store = MemoryStore::new().with_rows("public", "posts", rows);
        let (engine, _) = engine(store);
        let engine = engine.with_max_limit(Some(2));

        let result = engine.query(&QueryDescriptor::new("public", "posts").page(1, 50)).await.unwrap();
        assert_eq!(result.limit, 2);
        assert_eq!(result.data.len(), 2);
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn update_audits_previous_and_current() {
        let store = MemoryStore::new().with_rows("public", "posts", vec![json!({"id": 7, "title": "old"})]);
        let (engine, audit) = engine(store);
        let target = TableRef::new("public", "posts");

        let changes = json!({"title": "new"}).as_object().cloned().unwrap();
        engine.update(&target, &json!(7), changes, Some("ana")).await.unwrap();

        let events = audit.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Update);
        assert_eq!(events[0].previous.as_ref().unwrap()["title"], json!("old"));
        assert_eq!(events[0].current.as_ref().unwrap()["title"], json!("new"));
        assert_eq!(events[0].actor.as_deref(), Some("ana"));
    }

    #[tokio::test]
    async fn insert_audits_only_new_value() {
        let store = MemoryStore::new().with_columns("public", "posts", &["title"]);
        let (engine, audit) = engine(store);
        let target = TableRef::new("public", "posts");

        let row = engine
            .insert(&target, json!({"title": "hi"}).as_object().cloned().unwrap(), None)
            .await
            .unwrap();

        let events = audit.events().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].previous.is_none());
        assert_eq!(events[0].current.as_ref(), Some(&Value::Object(row)));
    }

    #[tokio::test]
    async fn failed_insert_emits_nothing() {
        let store = MemoryStore::new().with_columns("public", "posts", &["title"]);
        let (engine, audit) = engine(store);
        let target = TableRef::new("public", "posts");

        let err = engine
            .insert(&target, json!({"bogus": 1}).as_object().cloned().unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Store(StoreError::UnknownColumn(_))));
        assert!(audit.events().await.is_empty());
    }
}
