pub mod types;
pub mod error;
pub mod predicate;
pub mod pagination;
pub mod store;
pub mod memory;
pub mod validate;
pub mod engine;

pub use types::*;
pub use error::{QueryError, StoreError};
pub use predicate::{CompareOp, Conjunction, IsValue, Predicate, PredicateKind};
pub use pagination::{Pagination, RowRange};
pub use store::{RecordStore, SelectRequest, SelectResponse, SharedStoreProvider, StoreProvider, UpdatedRow};
pub use memory::MemoryStore;
pub use engine::QueryEngine;
