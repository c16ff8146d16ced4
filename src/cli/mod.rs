pub mod client;
pub mod commands;
pub mod config;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "admin")]
#[command(about = "Admin CLI - data explorer and plugin runtime client")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, env = "ADMIN_API_URL", help = "Server base URL (default: saved or http://localhost:3000)")]
    pub server: Option<String>,

    #[arg(long, global = true, env = "ADMIN_API_TOKEN", hide_env_values = true, help = "Bearer token")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run a filtered, paginated data explorer query")]
    Query(commands::query::QueryArgs),

    #[command(about = "Print the SQL a query would run against Postgres, without connecting")]
    Explain(commands::query::QueryArgs),

    #[command(about = "Plugin registry and task operations")]
    Plugins {
        #[command(subcommand)]
        cmd: commands::plugins::PluginCommands,
    },

    #[command(about = "Mint a development JWT")]
    Token(commands::token::TokenArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let connection = config::Connection::resolve(cli.server, cli.token)?;

    match cli.command {
        Commands::Query(args) => commands::query::handle_query(args, &connection, output_format).await,
        Commands::Explain(args) => commands::query::handle_explain(args, output_format),
        Commands::Plugins { cmd } => commands::plugins::handle(cmd, &connection, output_format).await,
        Commands::Token(args) => commands::token::handle(args, output_format),
    }
}
