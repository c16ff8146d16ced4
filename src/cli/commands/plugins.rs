use clap::Subcommand;
use serde_json::Value;

use crate::cli::client::ApiClient;
use crate::cli::config::Connection;
use crate::cli::utils::output_value;
use crate::cli::OutputFormat;
use crate::plugin::PluginId;

#[derive(Subcommand)]
pub enum PluginCommands {
    #[command(about = "List registered plugins with their state, tasks and routes")]
    List,

    #[command(about = "Run one tick of a service plugin task now")]
    Tick {
        #[arg(help = "Plugin id, <namespace>/<name>")]
        id: String,
        #[arg(help = "Task name")]
        task: String,
    },
}

pub async fn handle(cmd: PluginCommands, connection: &Connection, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::new(connection)?;
    match cmd {
        PluginCommands::List => {
            let data = client.get("/api/plugins").await?;
            output_value(output_format, &describe_plugins(&data), &data)
        }
        PluginCommands::Tick { id, task } => {
            let id = PluginId::parse(&id)?;
            let path = format!("/api/plugins/{}/{}/tasks/{}", id.namespace(), id.name(), task);
            let outcome = client.post(&path, &Value::Null).await?;
            let text = format!(
                "{} {}: {}",
                id,
                task,
                outcome.get("outcome").and_then(Value::as_str).unwrap_or("unknown")
            );
            output_value(output_format, &text, &outcome)
        }
    }
}

fn describe_plugins(data: &Value) -> String {
    let plugins = data.get("plugins").and_then(Value::as_array).cloned().unwrap_or_default();
    if plugins.is_empty() {
        return "No plugins registered".to_string();
    }
    plugins
        .iter()
        .map(|p| {
            let field = |name: &str| p.get(name).and_then(Value::as_str).unwrap_or("-").to_string();
            let enabled = p.get("enabled").and_then(Value::as_bool).unwrap_or(true);
            format!(
                "{:<32} {:<8} {:<9}{}",
                field("id"),
                field("runtime"),
                field("state"),
                if enabled { "" } else { " (disabled)" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_marks_disabled_plugins() {
        let data = json!({"plugins": [
            {"id": "platform/visit-counter", "runtime": "service", "state": "active", "enabled": false}
        ]});
        let text = describe_plugins(&data);
        assert!(text.starts_with("platform/visit-counter"));
        assert!(text.ends_with("(disabled)"));
        assert_eq!(describe_plugins(&json!({"plugins": []})), "No plugins registered");
    }
}
