use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::error::StoreError;
use super::pagination::RowRange;
use super::predicate::Conjunction;
use super::types::{Row, SortSpec, TableRef};

/// Immutable select handed to a store: composed predicate, optional order, row range
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub target: TableRef,
    pub predicate: Conjunction,
    pub order: Option<SortSpec>,
    pub range: RowRange,
}

#[derive(Debug, Clone, Default)]
pub struct SelectResponse {
    pub data: Vec<Row>,
    /// Filtered, pre-range row count. `None` when the store could not produce one.
    pub count: Option<u64>,
}

/// Previous and current values of an updated row
#[derive(Debug, Clone)]
pub struct UpdatedRow {
    pub previous: Row,
    pub current: Row,
}

/// Record-store collaborator. Column existence and type checks belong here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse, StoreError>;

    async fn insert(&self, target: &TableRef, values: Row) -> Result<Row, StoreError>;

    async fn update(&self, target: &TableRef, id: &Value, changes: Row) -> Result<UpdatedRow, StoreError>;

    async fn delete(&self, target: &TableRef, id: &Value) -> Result<(), StoreError>;
}

/// Resolves the record store backing a tenant
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn store_for(&self, tenant: &str) -> Result<Arc<dyn RecordStore>, StoreError>;

    /// Backend reachability, reported by the health check
    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Provider that hands every tenant the same store
pub struct SharedStoreProvider {
    store: Arc<dyn RecordStore>,
}

impl SharedStoreProvider {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreProvider for SharedStoreProvider {
    async fn store_for(&self, _tenant: &str) -> Result<Arc<dyn RecordStore>, StoreError> {
        Ok(self.store.clone())
    }
}
