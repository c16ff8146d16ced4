use clap::Args;
use serde_json::json;

use crate::auth::{generate_jwt, permissions, Claims};
use crate::cli::config::{load_environment_config, save_environment_config};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[arg(long, default_value = "dev", help = "User the token is issued to")]
    pub user: String,

    #[arg(long, default_value = "dev", help = "Tenant the token is scoped to")]
    pub tenant: String,

    #[arg(long = "permission", short = 'p', help = "Permission to grant, repeatable (default: all)")]
    pub permissions: Vec<String>,

    #[arg(long, help = "Lifetime in hours (default: from config)")]
    pub hours: Option<u64>,

    #[arg(long, help = "Save as the default token for later commands")]
    pub save: bool,
}

pub fn handle(args: TokenArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let settings = &config::config().security;
    let permissions = if args.permissions.is_empty() {
        permissions::ALL.iter().map(|p| p.to_string()).collect()
    } else {
        args.permissions
    };

    let claims = Claims::new(
        &args.user,
        &args.tenant,
        permissions,
        args.hours.unwrap_or(settings.jwt_expiry_hours),
    );
    let token = generate_jwt(&claims, &settings.jwt_secret)?;

    if args.save {
        let mut saved = load_environment_config()?;
        saved.token = Some(token.clone());
        save_environment_config(&saved)?;
    }

    match output_format {
        OutputFormat::Json => output_success(
            output_format,
            "Token issued",
            Some(json!({ "token": token, "claims": claims })),
        ),
        OutputFormat::Text => {
            println!("{}", token);
            Ok(())
        }
    }
}
