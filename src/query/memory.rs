//! In-process record store over JSON rows.
//!
//! Evaluates the full operator set with SQL-like semantics (NULL never equals
//! anything, IS distinguishes NULL, NULLs sort last ascending). A single read
//! lock covers both the page and the count, so `total` and `data` always come
//! from the same snapshot.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use super::error::StoreError;
use super::predicate::{CompareOp, IsValue, Predicate, PredicateKind};
use super::store::{RecordStore, SelectRequest, SelectResponse, UpdatedRow};
use super::types::{id_to_string, Row, TableRef, ID_COLUMN};

#[derive(Debug, Default)]
struct Table {
    columns: BTreeSet<String>,
    rows: Vec<Row>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableRef, Table>>,
    failing_deletes: RwLock<HashSet<String>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            failing_deletes: RwLock::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Declare a table and seed it. Columns are the union of the row keys plus `id`.
    pub fn with_rows(mut self, schema: &str, table: &str, rows: Vec<Value>) -> Self {
        let mut columns: BTreeSet<String> = BTreeSet::new();
        columns.insert(ID_COLUMN.to_string());
        let mut seeded = Vec::with_capacity(rows.len());
        for row in rows {
            if let Value::Object(map) = row {
                columns.extend(map.keys().cloned());
                self.bump_next_id(map.get(ID_COLUMN));
                seeded.push(map);
            }
        }
        self.tables
            .get_mut()
            .insert(TableRef::new(schema, table), Table { columns, rows: seeded });
        self
    }

    /// Declare extra columns that no seeded row carries yet
    pub fn with_columns(mut self, schema: &str, table: &str, columns: &[&str]) -> Self {
        let entry = self.tables.get_mut().entry(TableRef::new(schema, table)).or_default();
        entry.columns.insert(ID_COLUMN.to_string());
        entry.columns.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Make deletes of these ids fail with a constraint violation
    pub fn with_failing_deletes(mut self, ids: &[Value]) -> Self {
        self.failing_deletes.get_mut().extend(ids.iter().map(id_to_string));
        self
    }

    pub async fn rows(&self, target: &TableRef) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(target)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn bump_next_id(&self, id: Option<&Value>) {
        if let Some(n) = id.and_then(Value::as_u64) {
            self.next_id.fetch_max(n + 1, AtomicOrdering::SeqCst);
        }
    }

    fn check_columns<'a>(table: &Table, columns: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
        for column in columns {
            if !table.columns.contains(column) {
                return Err(StoreError::UnknownColumn(column.to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(&request.target)
            .ok_or_else(|| StoreError::UnknownTable(request.target.to_string()))?;

        Self::check_columns(table, request.predicate.columns())?;
        if let Some(order) = &request.order {
            Self::check_columns(table, [order.column.as_str()])?;
        }

        let mut matched: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| request.predicate.predicates().iter().all(|p| matches(p, row)))
            .collect();

        if let Some(order) = &request.order {
            matched.sort_by(|a, b| {
                let ord = sort_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        let count = matched.len() as u64;
        let data = matched
            .into_iter()
            .skip(request.range.offset() as usize)
            .take(request.range.count() as usize)
            .cloned()
            .collect();

        Ok(SelectResponse { data, count: Some(count) })
    }

    async fn insert(&self, target: &TableRef, mut values: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(target)
            .ok_or_else(|| StoreError::UnknownTable(target.to_string()))?;
        Self::check_columns(table, values.keys().map(String::as_str))?;

        match values.get(ID_COLUMN) {
            Some(id) if !id.is_null() => {
                if table.rows.iter().any(|r| r.get(ID_COLUMN) == Some(id)) {
                    return Err(StoreError::Constraint(format!(
                        "duplicate key value for {}.{} = {}",
                        target, ID_COLUMN, id_to_string(id)
                    )));
                }
                self.bump_next_id(Some(id));
            }
            _ => {
                let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
                values.insert(ID_COLUMN.to_string(), Value::from(id));
            }
        }

        table.rows.push(values.clone());
        Ok(values)
    }

    async fn update(&self, target: &TableRef, id: &Value, changes: Row) -> Result<UpdatedRow, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(target)
            .ok_or_else(|| StoreError::UnknownTable(target.to_string()))?;
        Self::check_columns(table, changes.keys().map(String::as_str))?;

        let row = table
            .rows
            .iter_mut()
            .find(|r| r.get(ID_COLUMN).is_some_and(|v| values_equal(v, id)))
            .ok_or_else(|| StoreError::NotFound(format!("{} id {}", target, id_to_string(id))))?;

        let previous = row.clone();
        for (key, value) in changes {
            if key == ID_COLUMN {
                continue;
            }
            row.insert(key, value);
        }
        Ok(UpdatedRow { previous, current: row.clone() })
    }

    async fn delete(&self, target: &TableRef, id: &Value) -> Result<(), StoreError> {
        if self.failing_deletes.read().await.contains(&id_to_string(id)) {
            return Err(StoreError::Constraint(format!(
                "{} id {} is still referenced",
                target,
                id_to_string(id)
            )));
        }

        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(target)
            .ok_or_else(|| StoreError::UnknownTable(target.to_string()))?;
        let before = table.rows.len();
        table
            .rows
            .retain(|r| !r.get(ID_COLUMN).is_some_and(|v| values_equal(v, id)));
        if table.rows.len() == before {
            return Err(StoreError::NotFound(format!("{} id {}", target, id_to_string(id))));
        }
        Ok(())
    }
}

fn matches(predicate: &Predicate, row: &Row) -> bool {
    let cell = row.get(&predicate.column).unwrap_or(&Value::Null);
    match &predicate.kind {
        PredicateKind::Compare(op, value) => {
            if cell.is_null() || value.is_null() {
                return false;
            }
            match op {
                CompareOp::Eq => values_equal(cell, value),
                CompareOp::Neq => !values_equal(cell, value),
                CompareOp::Gt => compare_values(cell, value) == Some(Ordering::Greater),
                CompareOp::Gte => matches!(compare_values(cell, value), Some(Ordering::Greater | Ordering::Equal)),
                CompareOp::Lt => compare_values(cell, value) == Some(Ordering::Less),
                CompareOp::Lte => matches!(compare_values(cell, value), Some(Ordering::Less | Ordering::Equal)),
            }
        }
        PredicateKind::Pattern { pattern, case_insensitive } => match cell.as_str() {
            Some(text) if *case_insensitive => like(&text.to_lowercase(), &pattern.to_lowercase()),
            Some(text) => like(text, pattern),
            None => false,
        },
        PredicateKind::In(values) => !cell.is_null() && values.iter().any(|v| values_equal(cell, v)),
        PredicateKind::Is(is) => match is {
            IsValue::Null => cell.is_null(),
            IsValue::True => cell == &Value::Bool(true),
            IsValue::False => cell == &Value::Bool(false),
        },
        PredicateKind::Contains(value) => contains(cell, value),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn sort_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

/// JSON containment: arrays contain every needle element, objects contain every needle key
fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), Value::Array(needles)) => {
            needles.iter().all(|n| items.iter().any(|item| contains(item, n)))
        }
        (Value::Array(items), scalar) => items.iter().any(|item| values_equal(item, scalar)),
        (Value::Object(map), Value::Object(needles)) => contains_object(map, needles),
        (a, b) => values_equal(a, b),
    }
}

fn contains_object(map: &Map<String, Value>, needles: &Map<String, Value>) -> bool {
    needles
        .iter()
        .all(|(k, v)| map.get(k).is_some_and(|existing| contains(existing, v)))
}

/// SQL LIKE: `%` matches any run, `_` matches one character. No escape syntax.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::pagination::RowRange;
    use crate::query::predicate::Conjunction;
    use crate::query::types::{FilterOp, FilterRule, SortSpec};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new().with_rows(
            "public",
            "posts",
            vec![
                json!({"id": 1, "title": "Hello Rust", "score": 10, "tags": ["rust", "intro"], "deleted_at": null}),
                json!({"id": 2, "title": "hello world", "score": 3, "tags": ["intro"], "deleted_at": "2024-01-02"}),
                json!({"id": 3, "title": "Other", "score": null, "tags": [], "deleted_at": null}),
            ],
        )
    }

    fn request(rules: Vec<FilterRule>) -> SelectRequest {
        SelectRequest {
            target: TableRef::new("public", "posts"),
            predicate: Conjunction::fold(&rules).unwrap(),
            order: None,
            range: RowRange { start: 0, end: 99 },
        }
    }

    fn ids(response: &SelectResponse) -> Vec<i64> {
        response.data.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[test]
    fn like_supports_both_wildcards() {
        assert!(like("hello world", "hello%"));
        assert!(like("hello world", "%world"));
        assert!(like("hello world", "h_llo%"));
        assert!(like("abc", "%"));
        assert!(!like("hello", "hello_"));
        assert!(!like("Hello", "hello"));
    }

    #[tokio::test]
    async fn ilike_ignores_case_like_does_not() {
        let store = store();
        let like = store.select(&request(vec![FilterRule::new("title", FilterOp::Like, json!("hello%"))])).await.unwrap();
        let ilike = store.select(&request(vec![FilterRule::new("title", FilterOp::ILike, json!("hello%"))])).await.unwrap();
        assert_eq!(ids(&like), vec![2]);
        assert_eq!(ids(&ilike), vec![1, 2]);
    }

    #[tokio::test]
    async fn null_cells_never_compare() {
        let store = store();
        let gt = store.select(&request(vec![FilterRule::new("score", FilterOp::Gt, json!(0))])).await.unwrap();
        let neq = store.select(&request(vec![FilterRule::new("score", FilterOp::Neq, json!(3))])).await.unwrap();
        assert_eq!(ids(&gt), vec![1, 2]);
        assert_eq!(ids(&neq), vec![1]);
    }

    #[tokio::test]
    async fn contains_matches_array_subsets() {
        let store = store();
        let one = store.select(&request(vec![FilterRule::new("tags", FilterOp::Contains, json!("intro"))])).await.unwrap();
        let both = store.select(&request(vec![FilterRule::new("tags", FilterOp::Contains, json!(["rust", "intro"]))])).await.unwrap();
        assert_eq!(ids(&one), vec![1, 2]);
        assert_eq!(ids(&both), vec![1]);
    }

    #[tokio::test]
    async fn nulls_sort_last_ascending() {
        let store = store();
        let mut req = request(vec![]);
        req.order = Some(SortSpec { column: "score".to_string(), ascending: true });
        let response = store.select(&req).await.unwrap();
        assert_eq!(ids(&response), vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn unknown_column_is_a_store_error() {
        let store = store();
        let err = store
            .select(&request(vec![FilterRule::new("nope", FilterOp::Eq, json!(1))]))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownColumn("nope".to_string()));
    }

    #[tokio::test]
    async fn insert_assigns_next_id() {
        let store = store();
        let target = TableRef::new("public", "posts");
        let row = store
            .insert(&target, json!({"title": "new"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(row["id"], json!(4));
        assert_eq!(store.rows(&target).await.len(), 4);
    }
}
