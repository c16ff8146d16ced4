use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub plugins: PluginsConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_env() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Requests above this page size are capped, not rejected
    pub max_limit: Option<u32>,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    /// Seconds
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
    pub slow_query_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// YAML file mapping plugin id -> config overrides
    pub overrides_path: Option<String>,
    pub log_task_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

/// Overwrite `slot` when `key` is set and parses; bad values keep the preset
fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    if let Some(value) = env::var(key).ok().and_then(|v| v.parse().ok()) {
        *slot = value;
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::preset(Environment::from_env()).with_env_overrides()
    }

    /// Development is the base; staging and production tighten it
    pub fn preset(environment: Environment) -> Self {
        let base = Self::development();
        match environment {
            Environment::Development => base,
            Environment::Staging => Self {
                environment,
                query: QueryConfig { max_limit: Some(500), debug_logging: false },
                database: DatabaseConfig {
                    max_connections: 20,
                    connection_timeout: 10,
                    slow_query_threshold_ms: 500,
                    ..base.database
                },
                security: SecurityConfig { jwt_secret: String::new(), jwt_expiry_hours: 24 },
                ..base
            },
            Environment::Production => Self {
                environment,
                query: QueryConfig { max_limit: Some(100), debug_logging: false },
                database: DatabaseConfig {
                    max_connections: 50,
                    connection_timeout: 5,
                    enable_query_logging: false,
                    slow_query_threshold_ms: 1000,
                },
                api: ApiConfig { enable_request_logging: false, ..base.api },
                security: SecurityConfig { jwt_secret: String::new(), jwt_expiry_hours: 4 },
                ..base
            },
        }
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            query: QueryConfig { max_limit: Some(1000), debug_logging: true },
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
                slow_query_threshold_ms: 100,
            },
            api: ApiConfig { port: 3000, enable_request_logging: true },
            plugins: PluginsConfig { overrides_path: None, log_task_failures: true },
            security: SecurityConfig {
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7,
            },
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("QUERY_MAX_LIMIT") {
            // "none" or any non-number lifts the cap
            self.query.max_limit = v.parse().ok();
        }
        env_override("QUERY_DEBUG_LOGGING", &mut self.query.debug_logging);

        env_override("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        env_override("DATABASE_CONNECTION_TIMEOUT", &mut self.database.connection_timeout);
        env_override("DATABASE_ENABLE_QUERY_LOGGING", &mut self.database.enable_query_logging);
        env_override("DATABASE_SLOW_QUERY_THRESHOLD_MS", &mut self.database.slow_query_threshold_ms);

        env_override("PORT", &mut self.api.port);
        env_override("ADMIN_API_PORT", &mut self.api.port);
        env_override("API_ENABLE_REQUEST_LOGGING", &mut self.api.enable_request_logging);

        if let Ok(v) = env::var("PLUGIN_OVERRIDES_PATH") {
            self.plugins.overrides_path = Some(v).filter(|p| !p.trim().is_empty());
        }
        env_override("PLUGIN_LOG_TASK_FAILURES", &mut self.plugins.log_task_failures);

        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        env_override("SECURITY_JWT_EXPIRY_HOURS", &mut self.security.jwt_expiry_hours);

        self
    }
}

// Loaded once, on first access
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_is_permissive() {
        let config = AppConfig::preset(Environment::Development);
        assert_eq!(config.query.max_limit, Some(1000));
        assert!(config.query.debug_logging);
        assert!(!config.security.jwt_secret.is_empty());
    }

    #[test]
    fn production_requires_explicit_secret() {
        let config = AppConfig::preset(Environment::Production);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.query.max_limit, Some(100));
        assert!(config.security.jwt_secret.is_empty());
        assert!(!config.api.enable_request_logging);
        assert!(config.plugins.log_task_failures);
    }

    #[test]
    fn staging_keeps_unlisted_development_settings() {
        let config = AppConfig::preset(Environment::Staging);
        assert_eq!(config.database.max_connections, 20);
        assert!(config.database.enable_query_logging);
        assert_eq!(config.api.port, 3000);
    }
}
