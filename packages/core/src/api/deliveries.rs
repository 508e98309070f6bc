use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::AppError;
use crate::ingest::types::{DeliveryRecord, DeliveryStatus};

#[derive(Debug, Deserialize)]
pub struct DeliveryQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub incident_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryHistoryResponse {
    pub total: i64,
    pub items: Vec<DeliveryRecord>,
}

/// `GET /api/deliveries`: paginated delivery log, newest first.
///
/// Query params:
/// - `limit`: max items to return (default 20, clamped to 100)
/// - `status`: optional filter: sent | failed
/// - `incident_id`: optional filter
pub async fn get_deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveryQuery>,
) -> Result<Json<DeliveryHistoryResponse>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let status = params
        .status
        .as_deref()
        .map(|s| s.parse::<DeliveryStatus>().map_err(AppError::BadRequest))
        .transpose()?;

    let (items, total) = tokio::try_join!(
        state
            .repository
            .query_deliveries(limit, status, params.incident_id),
        state.repository.count_deliveries(status, params.incident_id),
    )?;

    Ok(Json(DeliveryHistoryResponse { total, items }))
}
