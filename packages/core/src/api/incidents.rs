//! Incident read endpoints.
//!
//! - `GET /api/incidents`                          filtered list
//! - `GET /api/incidents/:id`                      single incident
//! - `GET /api/incidents/by-severity/:severity`    ten most recent of a tier

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{parse_id, AppState};
use crate::error::AppError;
use crate::ingest::types::{Severity, Source};
use crate::repository::IncidentFilter;

const BY_SEVERITY_LIMIT: i64 = 10;

/// Widest look-back window a client may request: one year.
pub const MAX_QUERY_HOURS: i64 = 8760;

#[derive(Debug, Default, Deserialize)]
pub struct IncidentQuery {
    pub hours: Option<i64>,
    pub min_relevance: Option<f64>,
    pub source: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<i64>,
}

impl IncidentQuery {
    /// Validate and fill defaults. Empty `source`/`severity` mean "any".
    pub fn into_filter(self) -> Result<IncidentFilter, AppError> {
        let defaults = IncidentFilter::default();

        let source = match self.source.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Some(raw.parse::<Source>().map_err(AppError::BadRequest)?)
            }
            _ => None,
        };
        let severity = match self.severity.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Some(raw.parse::<Severity>().map_err(AppError::BadRequest)?)
            }
            _ => None,
        };

        let min_relevance = self.min_relevance.unwrap_or(defaults.min_relevance);
        if !(0.0..=1.0).contains(&min_relevance) {
            return Err(AppError::BadRequest(
                "min_relevance must be between 0.0 and 1.0".to_string(),
            ));
        }

        let hours = self.hours.unwrap_or(defaults.hours);
        if !(1..=MAX_QUERY_HOURS).contains(&hours) {
            return Err(AppError::BadRequest(format!(
                "hours must be between 1 and {}",
                MAX_QUERY_HOURS
            )));
        }

        Ok(IncidentFilter {
            hours,
            min_relevance,
            source,
            severity,
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, 100),
        })
    }
}

/// `GET /api/incidents`
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = query.into_filter()?;
    let incidents = state.repository.query_incidents(&filter, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "count": incidents.len(),
        "incidents": incidents,
    })))
}

/// `GET /api/incidents/:id`
pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let incident = state
        .repository
        .get_incident(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found".to_string()))?;

    Ok(Json(json!({ "success": true, "incident": incident })))
}

/// `GET /api/incidents/by-severity/:severity`
pub async fn incidents_by_severity(
    State(state): State<AppState>,
    Path(severity): Path<String>,
) -> Result<Json<Value>, AppError> {
    let severity = severity.parse::<Severity>().map_err(AppError::BadRequest)?;
    let incidents = state
        .repository
        .recent_by_severity(severity, BY_SEVERITY_LIMIT)
        .await?;

    Ok(Json(json!({
        "success": true,
        "severity": severity,
        "count": incidents.len(),
        "incidents": incidents,
    })))
}
