//! Pool statistics route handlers

use crate::db::{queries, ProjectRecord};
use crate::error::{not_found_error, validation_error, ApiResult};
use crate::models::{validate_project_ref, PoolListResponse, PoolQuery, ProjectPoolsResponse, SuccessResponse};
use crate::pool::PoolKey;
use crate::state::{AppState, SharedState};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

async fn find_project(state: &AppState, project_ref: &str) -> ApiResult<ProjectRecord> {
    validate_project_ref(project_ref).map_err(|e| validation_error(e.to_string()))?;

    state
        .projects
        .find_by_ref(project_ref)
        .await?
        .ok_or_else(|| not_found_error(format!("Project '{}' not found", project_ref)))
}

async fn project_pools(state: &AppState, project: ProjectRecord) -> ApiResult<ProjectPoolsResponse> {
    let stats = state
        .pools
        .get_pool_stats(&project.database_name)
        .await
        .ok_or_else(|| not_found_error(format!("No open pools for project '{}'", project.project_ref)))?;

    let pools = state
        .pools
        .list_pools()
        .await
        .into_iter()
        .filter(|p| p.key.database_name == project.database_name)
        .collect();

    Ok(ProjectPoolsResponse::new(project.project_ref, project.database_name, stats, pools))
}

/// Aggregate and per-pool stats for a project's database
pub async fn get_project_pools(
    State(state): State<SharedState>,
    Path(project_ref): Path<String>,
) -> ApiResult<Json<SuccessResponse<ProjectPoolsResponse>>> {
    let project = find_project(&state, &project_ref).await?;
    let response = project_pools(&state, project).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Pool statistics for project '{}'.", response.project_ref),
        response,
    )))
}

/// Open (or reuse) a project pool and run a round trip through it
pub async fn check_project_pool(
    State(state): State<SharedState>,
    Path(project_ref): Path<String>,
    Query(query): Query<PoolQuery>,
) -> ApiResult<Json<SuccessResponse<ProjectPoolsResponse>>> {
    let project = find_project(&state, &project_ref).await?;

    let key = PoolKey::new(&project.database_name, query.read_only);
    let pool = state.pools.get_pool(&key).await?;
    let client = pool.get().await?;
    client.query_one(queries::PING, &[]).await?;
    drop(client);

    if let Some(stats) = state.pools.get_key_stats(&key).await {
        info!(
            project_ref = %project.project_ref,
            read_only = query.read_only,
            total = stats.total_count,
            idle = stats.idle_count,
            "Project database reachable"
        );
    }

    let response = project_pools(&state, project).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Project '{}' database is reachable.", response.project_ref),
        response,
    )))
}

/// Every open pool
pub async fn list_pools(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<PoolListResponse>>> {
    let pools = state.pools.list_pools().await;

    Ok(Json(SuccessResponse::with_data(
        format!("{} open pool(s).", pools.len()),
        PoolListResponse { pools },
    )))
}
