use clap::Args;
use serde_json::{json, Map, Value};

use crate::cli::client::ApiClient;
use crate::cli::config::Connection;
use crate::cli::utils::{output_value, parse_filter_arg, parse_sort_arg};
use crate::cli::OutputFormat;
use crate::database::postgres::{count_sql, select_sql, SqlParam};
use crate::query::validate::parse_descriptor;
use crate::query::{Conjunction, Pagination, SelectRequest};

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, help = "Schema name")]
    pub schema: String,

    #[arg(long, help = "Table name")]
    pub table: String,

    #[arg(long = "filter", short = 'f', help = "column:operator:value, repeatable; filters are AND-ed")]
    pub filters: Vec<String>,

    #[arg(long, help = "Sort column, prefix with - for descending")]
    pub sort: Option<String>,

    #[arg(long, help = "1-indexed page")]
    pub page: Option<u32>,

    #[arg(long, help = "Rows per page")]
    pub limit: Option<u32>,
}

impl QueryArgs {
    /// The request body the explorer endpoint expects
    pub fn to_body(&self) -> anyhow::Result<Value> {
        let filters = self.filters.iter().map(|f| parse_filter_arg(f)).collect::<anyhow::Result<Vec<_>>>()?;

        let mut body = Map::new();
        body.insert("schema".into(), json!(self.schema));
        body.insert("table".into(), json!(self.table));
        body.insert("filters".into(), Value::Array(filters));
        if let Some(sort) = &self.sort {
            body.insert("sort".into(), parse_sort_arg(sort));
        }
        if let Some(page) = self.page {
            body.insert("page".into(), json!(page));
        }
        if let Some(limit) = self.limit {
            body.insert("limit".into(), json!(limit));
        }
        Ok(Value::Object(body))
    }
}

pub async fn handle_query(args: QueryArgs, connection: &Connection, output_format: OutputFormat) -> anyhow::Result<()> {
    let body = args.to_body()?;
    // Fail locally on grammar errors before touching the network
    parse_descriptor(&body)?;

    let client = ApiClient::new(connection)?;
    let result = client.post("/api/explorer/query", &body).await?;

    let rows = result.get("data").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
    let mut text = String::new();
    for row in result.get("data").and_then(Value::as_array).into_iter().flatten() {
        text.push_str(&row.to_string());
        text.push('\n');
    }
    text.push_str(&format!(
        "-- {} rows, page {} of total {} (limit {}, more: {})",
        rows,
        result.get("page").unwrap_or(&Value::Null),
        result.get("total").unwrap_or(&Value::Null),
        result.get("limit").unwrap_or(&Value::Null),
        result.get("hasMore").unwrap_or(&Value::Null),
    ));
    output_value(output_format, &text, &result)
}

pub fn handle_explain(args: QueryArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let descriptor = parse_descriptor(&args.to_body()?)?;
    let pagination = Pagination::resolve(descriptor.page, descriptor.limit, crate::config::config().query.max_limit)?;
    let request = SelectRequest {
        target: descriptor.target(),
        predicate: Conjunction::fold(&descriptor.filters)?,
        order: descriptor.sort.clone(),
        range: pagination.range(),
    };

    let select = select_sql(&request);
    let count = count_sql(&request);
    let text = format!(
        "{};\n-- params: {}\n{};\n-- params: {}",
        select.query,
        describe_params(&select.params),
        count.query,
        describe_params(&count.params)
    );
    let data = json!({
        "select": { "sql": select.query, "params": params_json(&select.params) },
        "count": { "sql": count.query, "params": params_json(&count.params) },
    });
    output_value(output_format, &text, &data)
}

fn param_json(param: &SqlParam) -> Value {
    match param {
        SqlParam::Text(s) => json!(s),
        SqlParam::Json(v) => v.clone(),
    }
}

fn params_json(params: &[SqlParam]) -> Vec<Value> {
    params.iter().map(param_json).collect()
}

fn describe_params(params: &[SqlParam]) -> String {
    if params.is_empty() {
        return "(none)".to_string();
    }
    params
        .iter()
        .enumerate()
        .map(|(i, p)| format!("${}={}", i + 1, param_json(p)))
        .collect::<Vec<_>>()
        .join(", ")
}
