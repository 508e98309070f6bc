use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::error::AppError;

/// `GET /api/stats`: dashboard counters over the last 24 hours.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.repository.stats(Utc::now()).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
