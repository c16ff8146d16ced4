//! Postgres-backed record store.
//!
//! Rows travel as `jsonb` in both directions: reads select `to_jsonb(r)` and
//! writes go through `jsonb_populate_record`, so column types are resolved by
//! the table definition rather than by the JSON value.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _};
use std::sync::Arc;
use std::time::Instant;

use super::manager::{DatabaseError, DatabaseManager};
use crate::config::config;
use crate::query::{
    id_to_string, CompareOp, Conjunction, PredicateKind, RecordStore, Row, SelectRequest, SelectResponse,
    SortSpec, StoreError, StoreProvider, TableRef, UpdatedRow, ID_COLUMN,
};

/// Bound parameter. Filter values travel as `jsonb` and are converted to the
/// column's own type by `jsonb_populate_record`, never compared as text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlParam>,
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(target: &TableRef) -> String {
    format!("{}.{}", quote(&target.schema), quote(&target.table))
}

/// `value` typed as `column` of `table`: `(jsonb_populate_record(NULL::t, $n))."c"`
fn typed_value(table: &str, column: &str, param: &str) -> String {
    format!("(jsonb_populate_record(NULL::{}, {}::jsonb)).{}", table, param, quote(column))
}

/// `{column: value}`, the shape `jsonb_populate_record` reads
fn column_object(column: &str, value: &Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(column.to_string(), value.clone());
    Value::Object(map)
}

struct WhereBuilder {
    table: String,
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl WhereBuilder {
    fn new(target: &TableRef) -> Self {
        Self { table: qualified(target), clauses: Vec::new(), params: Vec::new() }
    }

    fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn compare(&mut self, column: &str, op: CompareOp, value: &Value) -> String {
        match value {
            // `col = NULL` is never true; arrays and objects never reach here
            Value::Null | Value::Array(_) | Value::Object(_) => "FALSE".to_string(),
            scalar => {
                let p = self.push(SqlParam::Json(column_object(column, scalar)));
                format!("r.{} {} {}", quote(column), op.to_sql(), typed_value(&self.table, column, &p))
            }
        }
    }

    /// Only string values take part in pattern matching; backslash is literal
    fn pattern(&mut self, column: &str, pattern: &str, case_insensitive: bool) -> String {
        let p = self.push(SqlParam::Text(pattern.to_string()));
        let json = format!("to_jsonb(r.{})", quote(column));
        format!(
            "(jsonb_typeof({json}) = 'string' AND ({json} #>> '{{}}') {op} {p} ESCAPE '')",
            json = json,
            op = if case_insensitive { "ILIKE" } else { "LIKE" },
            p = p
        )
    }

    fn membership(&mut self, column: &str, values: &[Value]) -> String {
        let rows: Vec<Value> = values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| column_object(column, v))
            .collect();
        if rows.is_empty() {
            return "1=0".to_string();
        }
        let p = self.push(SqlParam::Json(Value::Array(rows)));
        format!(
            "r.{col} IN (SELECT (jsonb_populate_record(NULL::{table}, e.value)).{col} FROM jsonb_array_elements({p}::jsonb) e)",
            col = quote(column),
            table = self.table,
            p = p
        )
    }

    fn build(mut self, predicate: &Conjunction) -> (String, Vec<SqlParam>) {
        for p in predicate.predicates() {
            let clause = match &p.kind {
                PredicateKind::Compare(op, value) => self.compare(&p.column, *op, value),
                PredicateKind::Pattern { pattern, case_insensitive } => {
                    self.pattern(&p.column, pattern, *case_insensitive)
                }
                PredicateKind::In(values) => self.membership(&p.column, values),
                PredicateKind::Is(is) => format!("r.{} IS {}", quote(&p.column), is.to_sql()),
                PredicateKind::Contains(value) => {
                    let param = self.push(SqlParam::Json(value.clone()));
                    format!("to_jsonb(r.{}) @> {}::jsonb", quote(&p.column), param)
                }
            };
            self.clauses.push(clause);
        }
        let sql = if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        };
        (sql, self.params)
    }
}

fn where_clause(target: &TableRef, predicate: &Conjunction) -> (String, Vec<SqlParam>) {
    WhereBuilder::new(target).build(predicate)
}

/// An id the id column cannot hold names no row
fn missing_on_bad_id(err: StoreError, target: &TableRef, id_text: &str) -> StoreError {
    match err {
        StoreError::InvalidValue(_) => StoreError::NotFound(format!("{} id {}", target, id_text)),
        other => other,
    }
}

/// `r."id" = <id typed as the table's id column>`
fn id_clause(target: &TableRef, param: &str) -> String {
    format!("r.{} = {}", quote(ID_COLUMN), typed_value(&qualified(target), ID_COLUMN, param))
}

fn order_clause(order: Option<&SortSpec>) -> String {
    match order {
        Some(sort) => format!(
            " ORDER BY r.{} {}",
            quote(&sort.column),
            if sort.ascending { "ASC NULLS LAST" } else { "DESC NULLS FIRST" }
        ),
        None => String::new(),
    }
}

/// Page query: filtered, ordered, windowed to the inclusive row range
pub fn select_sql(request: &SelectRequest) -> SqlResult {
    let (filter, params) = where_clause(&request.target, &request.predicate);
    let query = format!(
        "SELECT to_jsonb(r) AS row FROM {} r{}{} LIMIT {} OFFSET {}",
        qualified(&request.target),
        filter,
        order_clause(request.order.as_ref()),
        request.range.count(),
        request.range.offset()
    );
    SqlResult { query, params }
}

/// Count of every row matching the filter, ignoring the range
pub fn count_sql(request: &SelectRequest) -> SqlResult {
    let (filter, params) = where_clause(&request.target, &request.predicate);
    let query = format!("SELECT COUNT(*) AS count FROM {} r{}", qualified(&request.target), filter);
    SqlResult { query, params }
}

fn column_list(values: &Row) -> String {
    values.keys().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn bind_param<'q>(q: Query<'q, Postgres, PgArguments>, param: &SqlParam) -> Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Text(s) => q.bind(s.clone()),
        SqlParam::Json(v) => q.bind(v.clone()),
    }
}

fn build_query(sql: &SqlResult) -> Query<'_, Postgres, PgArguments> {
    sql.params
        .iter()
        .fold(sqlx::query(&sql.query), |q, p| bind_param(q, p))
}

/// Map Postgres SQLSTATE codes onto store errors
fn map_sqlx_error(target: &TableRef, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            match code.as_str() {
                "42P01" | "3F000" => StoreError::UnknownTable(target.to_string()),
                "42703" => StoreError::UnknownColumn(db.message().to_string()),
                // Data exceptions: a filter or id value the column type cannot hold
                c if c.starts_with("22") => StoreError::InvalidValue(db.message().to_string()),
                c if c.starts_with("23") => StoreError::Constraint(db.message().to_string()),
                _ => StoreError::Query(db.message().to_string()),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(target.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Connection(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    match row.try_get::<Value, _>("row")? {
        Value::Object(map) => Ok(map),
        other => Err(sqlx::Error::Decode(format!("expected a row object, got {}", other).into())),
    }
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn log_timing(&self, label: &str, target: &TableRef, started: Instant) {
        let settings = &config().database;
        let elapsed = started.elapsed();
        if elapsed.as_millis() as u64 >= settings.slow_query_threshold_ms {
            tracing::warn!("Slow {} on {}: {}ms", label, target, elapsed.as_millis());
        } else if settings.enable_query_logging {
            tracing::debug!("{} on {} took {}ms", label, target, elapsed.as_millis());
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn select(&self, request: &SelectRequest) -> Result<SelectResponse, StoreError> {
        let target = &request.target;
        let started = Instant::now();
        let page = select_sql(request);
        let count = count_sql(request);

        // Page and count see the same snapshot
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error(target, e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(target, e))?;

        let total: i64 = build_query(&count)
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("count"))
            .map_err(|e| map_sqlx_error(target, e))?;

        let rows = build_query(&page)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(target, e))?;
        tx.commit().await.map_err(|e| map_sqlx_error(target, e))?;

        let data = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error(target, e))?;

        self.log_timing("select", target, started);
        Ok(SelectResponse { data, count: u64::try_from(total).ok() })
    }

    async fn insert(&self, target: &TableRef, values: Row) -> Result<Row, StoreError> {
        let started = Instant::now();
        let columns = column_list(&values);
        let query = format!(
            "INSERT INTO {table} AS r ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) RETURNING to_jsonb(r) AS row",
            table = qualified(target),
            columns = columns
        );

        let row = sqlx::query(&query)
            .bind(Value::Object(values))
            .fetch_one(&self.pool)
            .await
            .and_then(|r| decode_row(&r))
            .map_err(|e| map_sqlx_error(target, e))?;

        self.log_timing("insert", target, started);
        Ok(row)
    }

    async fn update(&self, target: &TableRef, id: &Value, changes: Row) -> Result<UpdatedRow, StoreError> {
        let started = Instant::now();
        let id_text = id_to_string(id);
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error(target, e))?;

        let previous_sql = format!(
            "SELECT to_jsonb(r) AS row FROM {} r WHERE {} FOR UPDATE",
            qualified(target),
            id_clause(target, "$1")
        );
        let previous = sqlx::query(&previous_sql)
            .bind(column_object(ID_COLUMN, id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| missing_on_bad_id(map_sqlx_error(target, e), target, &id_text))?
            .ok_or_else(|| StoreError::NotFound(format!("{} id {}", target, id_text)))?;
        let previous = decode_row(&previous).map_err(|e| map_sqlx_error(target, e))?;

        let columns = column_list(&changes);
        let update_sql = format!(
            "UPDATE {table} AS r SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)) WHERE {id} RETURNING to_jsonb(r) AS row",
            table = qualified(target),
            columns = columns,
            id = id_clause(target, "$2")
        );
        let current = sqlx::query(&update_sql)
            .bind(Value::Object(changes))
            .bind(column_object(ID_COLUMN, id))
            .fetch_one(&mut *tx)
            .await
            .and_then(|r| decode_row(&r))
            .map_err(|e| map_sqlx_error(target, e))?;
        tx.commit().await.map_err(|e| map_sqlx_error(target, e))?;

        self.log_timing("update", target, started);
        Ok(UpdatedRow { previous, current })
    }

    async fn delete(&self, target: &TableRef, id: &Value) -> Result<(), StoreError> {
        let started = Instant::now();
        let id_text = id_to_string(id);
        let query = format!("DELETE FROM {} r WHERE {}", qualified(target), id_clause(target, "$1"));

        let result = sqlx::query(&query)
            .bind(column_object(ID_COLUMN, id))
            .execute(&self.pool)
            .await
            .map_err(|e| missing_on_bad_id(map_sqlx_error(target, e), target, &id_text))?;

        self.log_timing("delete", target, started);
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{} id {}", target, id_text)));
        }
        Ok(())
    }
}

/// Hands each tenant a store over its own database
#[derive(Clone, Default)]
pub struct PgStoreProvider {
    manager: DatabaseManager,
}

impl PgStoreProvider {
    pub fn new(manager: DatabaseManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl StoreProvider for PgStoreProvider {
    async fn store_for(&self, tenant: &str) -> Result<Arc<dyn RecordStore>, StoreError> {
        let pool = self.manager.tenant_pool(tenant).await.map_err(|e| match e {
            DatabaseError::Sqlx(inner) => StoreError::Connection(inner.to_string()),
            other => StoreError::Connection(other.to_string()),
        })?;
        Ok(Arc::new(PgRecordStore::new(pool)))
    }

    async fn health(&self) -> Result<(), StoreError> {
        self.manager
            .health_check()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}
