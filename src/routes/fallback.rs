//! Fallback usage ledger route handlers

use crate::credentials::ledger::DEFAULT_RECENT_LIMIT;
use crate::credentials::FallbackUsageStats;
use crate::error::{validation_error, ApiResult};
use crate::models::{FallbackUsageQuery, FallbackUsageResponse, MessageResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};
use tracing::info;
use validator::Validate;

/// Most recent fallback events, newest first
pub async fn list_fallback_usage(
    State(state): State<SharedState>,
    Query(query): Query<FallbackUsageQuery>,
) -> ApiResult<Json<SuccessResponse<FallbackUsageResponse>>> {
    query.validate().map_err(|e| validation_error(e.to_string()))?;

    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let entries = state.ledger.get_recent_fallback_usage(limit).await;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} fallback event(s).", entries.len()),
        FallbackUsageResponse { entries },
    )))
}

pub async fn fallback_usage_stats(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<FallbackUsageStats>>> {
    let stats = state.ledger.get_fallback_usage_stats().await;

    Ok(Json(SuccessResponse::with_data("Fallback usage statistics.", stats)))
}

pub async fn clear_fallback_usage(State(state): State<SharedState>) -> ApiResult<Json<MessageResponse>> {
    state.ledger.clear_fallback_usage_log().await;
    info!("Fallback usage log cleared");

    Ok(Json(MessageResponse::new("Fallback usage log cleared.")))
}
