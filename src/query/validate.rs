//! Strict request grammar for the data explorer.
//!
//! Route handlers receive untyped JSON; this turns it into a `QueryDescriptor`
//! or a validation error naming the offending field. Unknown fields are
//! rejected rather than ignored.

use serde_json::{Map, Value};

use super::error::QueryError;
use super::predicate::Predicate;
use super::types::{FilterOp, FilterRule, QueryDescriptor, Row, SortSpec};

const DESCRIPTOR_FIELDS: &[&str] = &["schema", "table", "filters", "sort", "page", "limit"];
const RULE_FIELDS: &[&str] = &["column", "operator", "value"];
const SORT_FIELDS: &[&str] = &["column", "ascending"];

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_identifier(field: &str, name: &str) -> Result<(), QueryError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(QueryError::validation(format!("{} '{}' is not a valid identifier", field, name)))
    }
}

pub fn parse_descriptor(body: &Value) -> Result<QueryDescriptor, QueryError> {
    let obj = as_object(body, "request body")?;
    reject_unknown(obj, DESCRIPTOR_FIELDS, "request body")?;

    let schema = required_identifier(obj, "schema")?;
    let table = required_identifier(obj, "table")?;

    let filters = match obj.get("filters") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_rule(item, i))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(QueryError::validation("filters must be an array")),
    };

    let sort = match obj.get("sort") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_sort(value)?),
    };

    Ok(QueryDescriptor {
        schema,
        table,
        filters,
        sort,
        page: positive(obj, "page")?,
        limit: positive(obj, "limit")?,
    })
}

fn parse_rule(value: &Value, index: usize) -> Result<FilterRule, QueryError> {
    let field = format!("filters[{}]", index);
    let obj = as_object(value, &field)?;
    reject_unknown(obj, RULE_FIELDS, &field)?;

    let column = required_identifier(obj, "column")
        .map_err(|e| QueryError::validation(format!("{}: {}", field, e)))?;
    let tag = obj
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::validation(format!("{}.operator is required", field)))?;
    let operator = FilterOp::parse(tag)
        .ok_or_else(|| QueryError::validation(format!("{}.operator '{}' is not supported", field, tag)))?;

    let rule = FilterRule::new(column, operator, obj.get("value").cloned().unwrap_or(Value::Null));
    // Surface value-shape problems here, with the field path attached
    Predicate::from_rule(&rule).map_err(|e| QueryError::validation(format!("{}: {}", field, e)))?;
    Ok(rule)
}

fn parse_sort(value: &Value) -> Result<SortSpec, QueryError> {
    let obj = as_object(value, "sort")?;
    reject_unknown(obj, SORT_FIELDS, "sort")?;
    let column = required_identifier(obj, "column")?;
    let ascending = match obj.get("ascending") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(QueryError::validation("sort.ascending must be a boolean")),
    };
    Ok(SortSpec { column, ascending })
}

/// Validate a row payload for insert/update: object with identifier keys
pub fn parse_row(body: &Value) -> Result<Row, QueryError> {
    let obj = as_object(body, "row")?;
    for key in obj.keys() {
        validate_identifier("column", key)?;
    }
    Ok(obj.clone())
}

/// Validate a batch delete payload: `{ "ids": [..] }` with scalar ids
pub fn parse_ids(body: &Value) -> Result<Vec<Value>, QueryError> {
    let obj = as_object(body, "request body")?;
    reject_unknown(obj, &["ids"], "request body")?;
    let ids = obj
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| QueryError::validation("ids must be an array"))?;
    if ids.is_empty() {
        return Err(QueryError::validation("ids must not be empty"));
    }
    for id in ids {
        if !matches!(id, Value::String(_) | Value::Number(_)) {
            return Err(QueryError::validation(format!("id {} must be a string or number", id)));
        }
    }
    Ok(ids.clone())
}

/// Path segments arrive as text; canonical integers are matched as numbers.
/// Anything that would not print back the same ("007", "+5") stays a string.
pub fn parse_path_id(raw: &str) -> Value {
    match raw.parse::<i64>() {
        Ok(n) if n.to_string() == raw => Value::from(n),
        _ => Value::String(raw.to_string()),
    }
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, QueryError> {
    value
        .as_object()
        .ok_or_else(|| QueryError::validation(format!("{} must be an object", field)))
}

fn reject_unknown(obj: &Map<String, Value>, allowed: &[&str], field: &str) -> Result<(), QueryError> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(QueryError::validation(format!("{} has unknown field '{}'", field, key))),
        None => Ok(()),
    }
}

fn required_identifier(obj: &Map<String, Value>, field: &str) -> Result<String, QueryError> {
    let name = obj
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::validation(format!("{} is required", field)))?;
    validate_identifier(field, name)?;
    Ok(name.to_string())
}

fn positive(obj: &Map<String, Value>, field: &str) -> Result<Option<u32>, QueryError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|n| *n >= 1 && *n <= u32::MAX as u64)
            .map(|n| Some(n as u32))
            .ok_or_else(|| QueryError::validation(format!("{} must be an integer >= 1", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_descriptor() {
        let descriptor = parse_descriptor(&json!({
            "schema": "cms",
            "table": "entries",
            "filters": [
                {"column": "status", "operator": "eq", "value": "published"},
                {"column": "deleted_at", "operator": "is", "value": null}
            ],
            "sort": {"column": "created_at", "ascending": false},
            "page": 2,
            "limit": 50
        }))
        .unwrap();

        assert_eq!(descriptor.filters.len(), 2);
        assert_eq!(descriptor.filters[1].operator, FilterOp::Is);
        assert_eq!(descriptor.sort, Some(SortSpec { column: "created_at".into(), ascending: false }));
        assert_eq!((descriptor.page, descriptor.limit), (Some(2), Some(50)));
    }

    #[test]
    fn rejects_unknown_fields_and_operators() {
        let unknown = parse_descriptor(&json!({"schema": "a", "table": "b", "where": {}}));
        assert!(matches!(unknown, Err(QueryError::Validation(m)) if m.contains("where")));

        let bad_op = parse_descriptor(&json!({
            "schema": "a", "table": "b",
            "filters": [{"column": "x", "operator": "between", "value": [1, 2]}]
        }));
        assert!(matches!(bad_op, Err(QueryError::Validation(m)) if m.contains("filters[0]")));
    }

    #[test]
    fn rejects_bad_identifiers_and_pages() {
        assert!(parse_descriptor(&json!({"schema": "a;drop", "table": "b"})).is_err());
        assert!(parse_descriptor(&json!({"table": "b"})).is_err());
        assert!(parse_descriptor(&json!({"schema": "a", "table": "b", "page": 0})).is_err());
        assert!(parse_descriptor(&json!({"schema": "a", "table": "b", "limit": -5})).is_err());
        assert!(parse_descriptor(&json!({"schema": "a", "table": "b", "limit": "10"})).is_err());
    }

    #[test]
    fn rejects_value_shape_mismatch() {
        let err = parse_descriptor(&json!({
            "schema": "a", "table": "b",
            "filters": [{"column": "x", "operator": "in", "value": "1,2"}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("expects an array"));
    }

    #[test]
    fn ids_payload_requires_scalars() {
        assert_eq!(parse_ids(&json!({"ids": [1, "b"]})).unwrap().len(), 2);
        assert!(parse_ids(&json!({"ids": []})).is_err());
        assert!(parse_ids(&json!({"ids": [{"id": 1}]})).is_err());
        assert!(parse_ids(&json!([1, 2])).is_err());
    }

    #[test]
    fn path_ids_prefer_numbers() {
        assert_eq!(parse_path_id("42"), json!(42));
        assert_eq!(parse_path_id("a1b2"), json!("a1b2"));
        assert_eq!(parse_path_id("-5"), json!(-5));
    }

    #[test]
    fn padded_path_ids_keep_their_text() {
        assert_eq!(parse_path_id("007"), json!("007"));
        assert_eq!(parse_path_id("+5"), json!("+5"));
        assert_eq!(parse_path_id("-0"), json!("-0"));
    }
}
