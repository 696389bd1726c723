//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::connection_string::ConnectionStringError;
use crate::credentials::CredentialError;
use crate::pool::PoolError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("{0}")]
    PoolRouting(#[from] PoolError),

    #[error("{0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AppError {
    /// Status, machine-readable code, client message and optional details
    fn parts(&self) -> (StatusCode, &'static str, String, Option<String>) {
        match self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::PoolRouting(e) => {
                warn!("Pool routing error: {}", e);
                match e {
                    PoolError::Credentials { .. } => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "CREDENTIAL_CONFIG_ERROR",
                        "Database credentials are misconfigured".to_string(),
                        Some(e.to_string()),
                    ),
                    PoolError::Creation { .. } | PoolError::ConnectionString(_) | PoolError::Closed => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "DATABASE_UNAVAILABLE",
                        "The database is temporarily unavailable".to_string(),
                        Some(e.to_string()),
                    ),
                }
            }
            AppError::Credential(e) => {
                error!("Credential error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CREDENTIAL_CONFIG_ERROR",
                    "Database credentials are misconfigured".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::ConnectionString(e) => (
                StatusCode::BAD_REQUEST,
                "INVALID_CONNECTION_STRING",
                e.to_string(),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = self.parts();

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_failures_are_configuration_errors() {
        let err = AppError::from(CredentialError::FallbackDisabled {
            project_ref: "abc".to_string(),
            reason: "No database credentials stored for project".to_string(),
        });
        let (status, code, _, _) = err.parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "CREDENTIAL_CONFIG_ERROR");
    }

    #[test]
    fn test_pool_creation_failures_are_transient() {
        let err = AppError::from(PoolError::Creation {
            database: "abc_db".to_string(),
            cause: "connection refused".to_string(),
        });
        let (status, code, _, details) = err.parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "DATABASE_UNAVAILABLE");
        assert!(details.unwrap().contains("abc_db"));
    }

    #[test]
    fn test_closed_router_is_unavailable() {
        let (status, code, _, _) = AppError::from(PoolError::Closed).parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "DATABASE_UNAVAILABLE");
    }

    #[test]
    fn test_bad_connection_string_is_client_error() {
        let response = AppError::from(ConnectionStringError::MissingHost).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
