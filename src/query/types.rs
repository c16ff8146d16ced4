use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single row as returned by a record store
pub type Row = Map<String, Value>;

/// Primary key column used by the mutation operations
pub const ID_COLUMN: &str = "id";

/// Page size used when a descriptor does not carry one
pub const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    Is,
    Contains,
}

impl FilterOp {
    pub const ALL: [FilterOp; 11] = [
        FilterOp::Eq,
        FilterOp::Neq,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::Like,
        FilterOp::ILike,
        FilterOp::In,
        FilterOp::Is,
        FilterOp::Contains,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::ILike => "ilike",
            FilterOp::In => "in",
            FilterOp::Is => "is",
            FilterOp::Contains => "contains",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == tag)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub column: String,
    pub operator: FilterOp,
    #[serde(default)]
    pub value: Value,
}

impl FilterRule {
    pub fn new(column: impl Into<String>, operator: FilterOp, value: Value) -> Self {
        Self { column: column.into(), operator, value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// Validated description of a data explorer query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl QueryDescriptor {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            filters: Vec::new(),
            sort: None,
            page: None,
            limit: None,
        }
    }

    pub fn filter(mut self, column: impl Into<String>, operator: FilterOp, value: Value) -> Self {
        self.filters.push(FilterRule::new(column, operator, value));
        self
    }

    pub fn sort(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.sort = Some(SortSpec { column: column.into(), ascending });
        self
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn target(&self) -> TableRef {
        TableRef::new(self.schema.clone(), self.table.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Vec<Row>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// Schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self { schema: schema.into(), table: table.into() }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Render a record id the way audit events and error messages carry it
pub fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operator_tags_round_trip_through_parse() {
        for op in FilterOp::ALL {
            assert_eq!(FilterOp::parse(op.as_str()), Some(op));
        }
        assert_eq!(FilterOp::parse("ILIKE"), None);
        assert_eq!(FilterOp::parse("$eq"), None);
    }

    #[test]
    fn descriptor_defaults_apply_on_deserialize() {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "schema": "public",
            "table": "entries",
            "sort": { "column": "created_at" }
        }))
        .unwrap();

        assert!(descriptor.filters.is_empty());
        assert_eq!(descriptor.page, None);
        assert_eq!(descriptor.sort.as_ref().map(|s| s.ascending), Some(true));
    }

    #[test]
    fn result_serializes_has_more_in_camel_case() {
        let result = QueryResult { data: vec![], total: 0, page: 1, limit: 20, has_more: false };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["hasMore"], json!(false));
        assert!(value.get("has_more").is_none());
    }
}
