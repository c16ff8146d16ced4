use anyhow::{anyhow, bail};
use serde_json::{json, Map, Value};

use crate::cli::OutputFormat;
use crate::query::FilterOp;

/// Print a payload: pretty JSON in JSON mode, `text` otherwise
pub fn output_value(output_format: OutputFormat, text: &str, data: &Value) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Text => println!("{}", text),
    }
    Ok(())
}

/// Output a success message in the appropriate format
pub fn output_success(output_format: OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = Map::new();
            response.insert("success".into(), json!(true));
            response.insert("message".into(), json!(message));
            if let Some(Value::Object(extra)) = data {
                response.extend(extra);
            }
            println!("{}", serde_json::to_string_pretty(&Value::Object(response))?);
        }
        OutputFormat::Text => println!("✓ {}", message),
    }
    Ok(())
}

/// `column:operator:value`. The value is read as JSON when it parses, so
/// `age:gt:30`, `id:in:[1,2]` and `deleted_at:is:null` keep their types;
/// anything else is a string.
pub fn parse_filter_arg(raw: &str) -> anyhow::Result<Value> {
    let mut parts = raw.splitn(3, ':');
    let (column, operator) = match (parts.next(), parts.next()) {
        (Some(c), Some(o)) if !c.is_empty() => (c, o),
        _ => bail!("filter '{}' must look like column:operator:value", raw),
    };
    let operator = FilterOp::parse(operator)
        .ok_or_else(|| anyhow!("filter '{}': unknown operator '{}'", raw, operator))?;
    let value = match parts.next() {
        None => Value::Null,
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
    };
    Ok(json!({ "column": column, "operator": operator.as_str(), "value": value }))
}

/// `column` sorts ascending, `-column` descending
pub fn parse_sort_arg(raw: &str) -> Value {
    match raw.strip_prefix('-') {
        Some(column) => json!({ "column": column, "ascending": false }),
        None => json!({ "column": raw, "ascending": true }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_values_keep_json_types() {
        assert_eq!(
            parse_filter_arg("age:gte:30").unwrap(),
            json!({"column": "age", "operator": "gte", "value": 30})
        );
        assert_eq!(
            parse_filter_arg("id:in:[1,2]").unwrap(),
            json!({"column": "id", "operator": "in", "value": [1, 2]})
        );
        assert_eq!(
            parse_filter_arg("name:ilike:%ada%").unwrap(),
            json!({"column": "name", "operator": "ilike", "value": "%ada%"})
        );
        assert_eq!(
            parse_filter_arg("note:eq:a:b").unwrap()["value"],
            json!("a:b")
        );
    }

    #[test]
    fn bad_filters_are_rejected() {
        assert!(parse_filter_arg("age").is_err());
        assert!(parse_filter_arg("age:between:1").is_err());
    }

    #[test]
    fn leading_dash_sorts_descending() {
        assert_eq!(parse_sort_arg("-created_at"), json!({"column": "created_at", "ascending": false}));
        assert_eq!(parse_sort_arg("name")["ascending"], json!(true));
    }
}
