//! Connection string route handlers
//!
//! Hands out project connection strings (masked unless asked otherwise) and
//! parses caller-supplied ones.

use crate::connection_string::parse_connection_string_with_fallback;
use crate::credentials::ConnectionStringRequest;
use crate::error::{not_found_error, validation_error, ApiResult};
use crate::models::{
    validate_project_ref, ConnectionStringQuery, ConnectionStringResponse, ParseConnectionStringRequest,
    ParsedConnectionString, SuccessResponse,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::{debug, info};
use validator::Validate;

/// Connection string for a project, resolved with fallback
pub async fn get_connection_string(
    State(state): State<SharedState>,
    Path(project_ref): Path<String>,
    Query(query): Query<ConnectionStringQuery>,
) -> ApiResult<Json<SuccessResponse<ConnectionStringResponse>>> {
    validate_project_ref(&project_ref).map_err(|e| validation_error(e.to_string()))?;

    let project = state
        .projects
        .find_by_ref(&project_ref)
        .await?
        .ok_or_else(|| not_found_error(format!("Project '{}' not found", project_ref)))?;

    let mut request = ConnectionStringRequest::new(&project.database_name, &project.project_ref);
    request.project_credentials = Some(project.credentials());
    request.read_only = query.read_only;
    request.use_environment_defaults = query.read_only;
    request.mask_password = query.masked();

    let generated = state
        .credentials
        .generate_connection_string_with_fallback(request)
        .await?;

    info!(
        project_ref = %project.project_ref,
        read_only = query.read_only,
        masked = query.masked(),
        used_fallback = generated.used_fallback,
        "Issued connection string"
    );

    Ok(Json(SuccessResponse::with_data(
        format!("Connection string for project '{}'.", project.project_ref),
        ConnectionStringResponse {
            project_ref: project.project_ref,
            database_name: project.database_name,
            read_only: query.read_only,
            generated,
        },
    )))
}

/// Parse a connection string into its parts
pub async fn parse_connection_string(
    Json(payload): Json<ParseConnectionStringRequest>,
) -> ApiResult<Json<SuccessResponse<ParsedConnectionString>>> {
    // Validate input
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let target = parse_connection_string_with_fallback(&payload.connection_string, payload.options())?;
    debug!(host = %target.host, database = %target.database_name, "Parsed connection string");

    Ok(Json(SuccessResponse::with_data(
        "Connection string parsed.",
        ParsedConnectionString {
            password_masked: target.password.is_masked(),
            target,
        },
    )))
}
