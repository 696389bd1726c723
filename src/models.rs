//! Data models and DTOs (Data Transfer Objects)
//!
//! Contains all request/response structures used by the API.

use crate::connection_string::{ConnectionTarget, ParseOptions};
use crate::credentials::{FallbackUsageEntry, GeneratedConnectionString};
use crate::pool::{PoolStats, PoolSummary};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

static PROJECT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("project ref pattern is valid")
});

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Message-only response (no data)
#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Validate a project reference path segment
pub fn validate_project_ref(project_ref: &str) -> Result<(), validator::ValidationError> {
    if !PROJECT_REF.is_match(project_ref) {
        let mut err = validator::ValidationError::new("invalid_project_ref");
        err.message = Some("Project ref must be 1-64 letters, digits, underscores or hyphens".into());
        return Err(err);
    }
    Ok(())
}

// =============================================================================
// CONNECTION STRINGS
// =============================================================================

/// Query for a project's connection string
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStringQuery {
    #[serde(default)]
    pub read_only: bool,
    /// Defaults to masked; only an explicit `mask=false` reveals the password
    pub mask: Option<bool>,
}

impl ConnectionStringQuery {
    pub fn masked(&self) -> bool {
        self.mask.unwrap_or(true)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStringResponse {
    pub project_ref: String,
    pub database_name: String,
    pub read_only: bool,
    #[serde(flatten)]
    pub generated: GeneratedConnectionString,
}

/// Request to parse a connection string
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParseConnectionStringRequest {
    #[validate(length(min = 1, max = 2048, message = "Connection string is required"))]
    pub connection_string: String,
    pub validate_format: Option<bool>,
    pub allow_masked_password: Option<bool>,
}

impl ParseConnectionStringRequest {
    pub fn options(&self) -> ParseOptions {
        ParseOptions {
            validate_format: self.validate_format.unwrap_or(true),
            allow_masked_password: self.allow_masked_password.unwrap_or(true),
        }
    }
}

/// Parsed target; the password is always rendered as the placeholder
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedConnectionString {
    pub target: ConnectionTarget,
    pub password_masked: bool,
}

// =============================================================================
// POOLS
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPoolsResponse {
    pub project_ref: String,
    pub database_name: String,
    pub total_count: usize,
    pub idle_count: usize,
    pub active_connections: usize,
    pub pools: Vec<PoolSummary>,
}

impl ProjectPoolsResponse {
    pub fn new(project_ref: String, database_name: String, stats: PoolStats, pools: Vec<PoolSummary>) -> Self {
        Self {
            project_ref,
            database_name,
            total_count: stats.total_count,
            idle_count: stats.idle_count,
            active_connections: stats.active_count(),
            pools,
        }
    }
}

/// Which of a project's pools to open
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolQuery {
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Serialize)]
pub struct PoolListResponse {
    pub pools: Vec<PoolSummary>,
}

// =============================================================================
// FALLBACK USAGE
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct FallbackUsageQuery {
    #[validate(range(min = 1, max = 1000, message = "Limit must be between 1 and 1000"))]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FallbackUsageResponse {
    pub entries: Vec<FallbackUsageEntry>,
}
