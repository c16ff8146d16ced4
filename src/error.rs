// HTTP API Error Types
use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::auth::{AuthError, PermissionError};
use crate::plugin::PluginError;
use crate::query::{QueryError, StoreError};

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError(String),
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::ValidationError(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "error": self.message(),
            "code": self.error_code()
        })
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        ApiError::ValidationError(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownTable(_) | StoreError::UnknownColumn(_) | StoreError::InvalidValue(_) => {
                ApiError::bad_request(err.to_string())
            }
            StoreError::Constraint(_) => ApiError::conflict(err.to_string()),
            StoreError::NotFound(_) => ApiError::not_found(err.to_string()),
            StoreError::Connection(msg) => {
                tracing::error!("Store connection error: {}", msg);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            StoreError::MissingCount | StoreError::Query(_) => {
                // Don't expose store internals to clients
                tracing::error!("Store error: {}", err);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Validation(msg) => ApiError::validation_error(msg),
            QueryError::Store(store) => store.into(),
            QueryError::BatchDelete { ref failed, ref source } => {
                tracing::error!("Batch delete failed for [{}]: {}", failed.join(", "), source);
                let message = format!("Batch delete failed for ids [{}]", failed.join(", "));
                match source {
                    StoreError::NotFound(_) => ApiError::not_found(message),
                    StoreError::Constraint(_) => ApiError::conflict(message),
                    StoreError::Connection(_) => ApiError::service_unavailable(message),
                    _ => ApiError::internal_server_error(message),
                }
            }
            QueryError::Audit(audit) => {
                tracing::error!("Audit sink error: {}", audit);
                ApiError::internal_server_error("Change applied but could not be audited")
            }
        }
    }
}

impl From<PluginError> for ApiError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::InvalidId(_)
            | PluginError::WrongRuntime { .. }
            | PluginError::InvalidCron { .. }
            | PluginError::Config(_) => ApiError::bad_request(err.to_string()),
            PluginError::NotFound(_) | PluginError::UnknownTask { .. } | PluginError::NoRoute { .. } => {
                ApiError::not_found(err.to_string())
            }
            PluginError::AlreadyRegistered(_)
            | PluginError::DuplicateRoute { .. }
            | PluginError::InvalidTransition { .. } => ApiError::conflict(err.to_string()),
            PluginError::NotActive { .. } | PluginError::Disabled(_) => ApiError::service_unavailable(err.to_string()),
            PluginError::Hook { .. } => ApiError::internal_server_error(err.to_string()),
            PluginError::Storage(storage) => {
                tracing::error!("Plugin storage error: {}", storage);
                ApiError::internal_server_error("Plugin storage failure")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

impl From<PermissionError> for ApiError {
    fn from(err: PermissionError) -> Self {
        ApiError::forbidden(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidJson(rejection.body_text())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_internals_are_not_leaked() {
        let err = ApiError::from(StoreError::Query("syntax error at or near \"r\"".into()));
        assert_eq!(err.status_code(), 500);
        assert!(!err.message().contains("syntax"));

        assert_eq!(ApiError::from(StoreError::MissingCount).status_code(), 500);
        assert_eq!(ApiError::from(StoreError::UnknownColumn("nope".into())).status_code(), 400);
        let bad_date = ApiError::from(StoreError::InvalidValue("invalid input syntax for type timestamp".into()));
        assert_eq!(bad_date.status_code(), 400);
    }

    #[test]
    fn batch_delete_names_failed_ids() {
        let err = ApiError::from(QueryError::BatchDelete {
            failed: vec!["2".into()],
            source: StoreError::NotFound("2".into()),
        });
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.message(), "Batch delete failed for ids [2]");
    }

    #[test]
    fn auth_and_permission_map_to_401_and_403() {
        assert_eq!(ApiError::from(AuthError::MissingToken).status_code(), 401);
        let denied = PermissionError { user: "u".into(), permission: "data.write".into() };
        assert_eq!(ApiError::from(denied).status_code(), 403);
    }
}
