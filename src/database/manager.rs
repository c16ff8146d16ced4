use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::config;

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid tenant database name: {0}")]
    InvalidTenantName(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Lazily created connection pools, one per tenant database
#[derive(Clone, Default)]
pub struct DatabaseManager {
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
}

impl DatabaseManager {
    const TENANT_PREFIX: &'static str = "tenant_";

    pub fn new() -> Self {
        Self::default()
    }

    /// Database backing a tenant: `tenant_` + first 16 hex chars of sha256(tenant)
    pub fn tenant_db_name(tenant: &str) -> String {
        let digest = Sha256::digest(tenant.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}{}", Self::TENANT_PREFIX, &hex[..16])
    }

    pub async fn tenant_pool(&self, tenant: &str) -> Result<PgPool, DatabaseError> {
        let database_name = Self::tenant_db_name(tenant);
        if !Self::is_valid_db_name(&database_name) {
            return Err(DatabaseError::InvalidTenantName(database_name));
        }
        self.get_pool(&database_name).await
    }

    /// Pool for the database named in DATABASE_URL, used by the health check
    pub async fn default_pool(&self) -> Result<PgPool, DatabaseError> {
        let base = Self::base_url()?;
        let name = base.path().trim_start_matches('/').to_string();
        self.get_pool(&name).await
    }

    async fn get_pool(&self, database_name: &str) -> Result<PgPool, DatabaseError> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(database_name) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write().await;
        // Another task may have connected while we waited for the write lock
        if let Some(pool) = pools.get(database_name) {
            return Ok(pool.clone());
        }

        let connection_string = Self::build_connection_string(database_name)?;
        let settings = &config().database;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect(&connection_string)
            .await?;

        pools.insert(database_name.to_string(), pool.clone());
        info!("Created database pool for: {}", database_name);
        Ok(pool)
    }

    fn base_url() -> Result<url::Url, DatabaseError> {
        let base = std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
        url::Url::parse(&base).map_err(|_| DatabaseError::InvalidDatabaseUrl)
    }

    fn build_connection_string(database_name: &str) -> Result<String, DatabaseError> {
        let mut url = Self::base_url()?;
        url.set_path(&format!("/{}", database_name));
        Ok(url.into())
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        let pool = self.default_pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    pub async fn close_all(&self) {
        let mut pools = self.pools.write().await;
        for (name, pool) in pools.drain() {
            pool.close().await;
            info!("Closed database pool: {}", name);
        }
    }

    /// Tenant names only ever reach the server as `tenant_[a-zA-Z0-9_]+`
    fn is_valid_db_name(name: &str) -> bool {
        match name.strip_prefix(Self::TENANT_PREFIX) {
            Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            None => false,
        }
    }
}
