//! `GET /api/summary`: AI digest of the current top incidents.
//!
//! The digest is generated at most once per cache TTL. Responses carry an
//! ETag derived from the cached entry, so dashboards polling with
//! `If-None-Match` get a `304` until the entry is regenerated.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::api::AppState;
use crate::db::format_timestamp;
use crate::error::AppError;
use crate::repository::IncidentFilter;

const SUMMARY_INCIDENTS: i64 = 10;
const NO_INCIDENTS: &str = "No active incidents in your area.";

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub summary: String,
    pub incident_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl DashboardSummary {
    fn etag(&self) -> String {
        format!(
            "W/\"{}-{}\"",
            self.generated_at.timestamp_micros(),
            self.incident_count
        )
    }
}

fn fallback_summary(count: usize) -> String {
    format!(
        "Found {} active incidents. Check individual alerts for details.",
        count
    )
}

/// `true` when `If-None-Match` lists `*` or `etag`.
fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .any(|tag| tag == "*" || tag == etag)
        })
        .unwrap_or(false)
}

async fn build_summary(state: &AppState) -> Result<DashboardSummary, AppError> {
    let filter = IncidentFilter {
        limit: SUMMARY_INCIDENTS,
        ..IncidentFilter::default()
    };
    let now = Utc::now();
    let incidents = state.repository.query_incidents(&filter, now).await?;

    let summary = if incidents.is_empty() {
        NO_INCIDENTS.to_string()
    } else {
        match &state.summarizer {
            Some(summarizer) => match summarizer.summarize(&incidents).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("Summary generation failed, using fallback: {}", err);
                    fallback_summary(incidents.len())
                }
            },
            None => fallback_summary(incidents.len()),
        }
    };

    Ok(DashboardSummary {
        summary,
        incident_count: incidents.len(),
        generated_at: now,
    })
}

pub async fn get_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // Held across generation so concurrent misses produce one model call.
    let mut cache = state.summary_cache.lock().await;
    let summary = match cache.get() {
        Some(cached) => cached,
        None => {
            let fresh = build_summary(&state).await?;
            cache.set(fresh.clone());
            fresh
        }
    };
    let max_age = cache.remaining().unwrap_or(cache.ttl()).as_secs();
    drop(cache);

    let etag = summary.etag();
    let cache_control = HeaderValue::from_str(&format!("public, max-age={}", max_age))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| AppError::Internal(format!("invalid etag: {}", e)))?;

    if if_none_match_matches(&headers, &etag) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag_value),
                (header::CACHE_CONTROL, cache_control),
            ],
        )
            .into_response());
    }

    let body = json!({
        "success": true,
        "summary": summary.summary,
        "incident_count": summary.incident_count,
        "generated_at": format_timestamp(summary.generated_at),
    });

    Ok((
        StatusCode::OK,
        [
            (header::ETAG, etag_value),
            (header::CACHE_CONTROL, cache_control),
        ],
        Json(body),
    )
        .into_response())
}
