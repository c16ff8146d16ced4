use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_SERVER: &str = "http://localhost:3000";

/// Saved CLI defaults (`env.json` in the config directory)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub server: Option<String>,
    pub token: Option<String>,
}

/// Where and as whom the CLI talks to the server
#[derive(Debug, Clone)]
pub struct Connection {
    pub server: String,
    pub token: Option<String>,
}

impl Connection {
    /// Flags and environment win over saved defaults
    pub fn resolve(server: Option<String>, token: Option<String>) -> anyhow::Result<Self> {
        let saved = load_environment_config()?;
        Ok(Self {
            server: server
                .or(saved.server)
                .unwrap_or_else(|| DEFAULT_SERVER.to_string())
                .trim_end_matches('/')
                .to_string(),
            token: token.or(saved.token),
        })
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let config_dir = if let Ok(custom_dir) = std::env::var("ADMIN_CLI_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
        PathBuf::from(home).join(".config").join("admin").join("cli")
    };
    Ok(config_dir)
}

pub fn load_environment_config() -> anyhow::Result<EnvironmentConfig> {
    let env_file = get_config_dir()?.join("env.json");
    if !env_file.exists() {
        return Ok(EnvironmentConfig::default());
    }

    let content = fs::read_to_string(env_file)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_environment_config(config: &EnvironmentConfig) -> anyhow::Result<()> {
    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_dir.join("env.json"), content)?;
    Ok(())
}
