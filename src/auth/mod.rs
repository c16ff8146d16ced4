use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod permissions {
    pub const DATA_READ: &str = "data.read";
    pub const DATA_WRITE: &str = "data.write";
    pub const PLUGINS_INVOKE: &str = "plugins.invoke";

    pub const ALL: [&str; 3] = [DATA_READ, DATA_WRITE, PLUGINS_INVOKE];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user: impl Into<String>, tenant: impl Into<String>, permissions: Vec<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        Self {
            sub: user.into(),
            tenant: tenant.into(),
            permissions,
            exp: (now + Duration::hours(expiry_hours as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingToken,

    #[error("Authorization header must use Bearer token format")]
    Malformed,

    #[error("JWT secret not configured")]
    SecretNotConfigured,

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
}

/// The caller lacks a permission the route requires
#[derive(Debug, Error, PartialEq)]
#[error("user '{user}' lacks permission '{permission}'")]
pub struct PermissionError {
    pub user: String,
    pub permission: String,
}

/// Authenticated caller, inserted into request extensions by the auth middleware
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub user: String,
    pub tenant: String,
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "*")
    }

    pub fn require(&self, permission: &str) -> Result<(), PermissionError> {
        if self.has(permission) {
            Ok(())
        } else {
            tracing::warn!("Permission '{}' denied for {}@{}", permission, self.user, self.tenant);
            Err(PermissionError { user: self.user.clone(), permission: permission.to_string() })
        }
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self { user: claims.sub, tenant: claims.tenant, permissions: claims.permissions }
    }
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::SecretNotConfigured);
    }
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::SecretNotConfigured);
    }
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
}
