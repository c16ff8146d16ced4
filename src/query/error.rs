use thiserror::Error;

use crate::audit::AuditError;

/// Failures reported by a record store. Propagated to callers verbatim.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store did not report a row count")]
    MissingCount,

    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Batch delete failed for ids [{}]: {source}", failed.join(", "))]
    BatchDelete {
        failed: Vec<String>,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl QueryError {
    pub fn validation(message: impl Into<String>) -> Self {
        QueryError::Validation(message.into())
    }
}
