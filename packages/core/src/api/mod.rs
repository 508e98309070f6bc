//! HTTP surface: router assembly and shared handler state.

pub mod deliveries;
pub mod health;
pub mod incidents;
pub mod stats;
pub mod subscribers;
pub mod summary;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Router,
};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::TtlCache;
use crate::error::AppError;
use crate::ingest::provider::Summarizer;
use crate::metrics::AppMetrics;
use crate::repository::IncidentRepository;
use summary::DashboardSummary;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<IncidentRepository>,
    /// `None` serves the count-only fallback digest.
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub summary_cache: Arc<Mutex<TtlCache<DashboardSummary>>>,
}

impl AppState {
    pub fn new(
        repository: Arc<IncidentRepository>,
        summarizer: Option<Arc<dyn Summarizer>>,
        summary_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            summarizer,
            summary_cache: Arc::new(Mutex::new(TtlCache::new(summary_ttl))),
        }
    }
}

/// Parse a numeric path id, reporting failures in the API's error envelope.
pub(crate) fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid id '{}'", raw)))
}

/// Assemble the full router. `metrics` enables `/metrics` and per-request
/// instrumentation.
pub fn create_router(state: AppState, metrics: Option<Arc<AppMetrics>>) -> Router {
    let mut app = Router::new()
        .route("/api/incidents", get(incidents::list_incidents))
        .route("/api/incidents/:id", get(incidents::get_incident))
        .route(
            "/api/incidents/by-severity/:severity",
            get(incidents::incidents_by_severity),
        )
        .route("/api/stats", get(stats::get_stats))
        .route("/api/summary", get(summary::get_summary))
        .route(
            "/api/subscribers",
            get(subscribers::list_subscribers).post(subscribers::create_subscriber),
        )
        .route(
            "/api/subscribers/:id",
            patch(subscribers::update_subscriber).delete(subscribers::delete_subscriber),
        )
        .route("/api/deliveries", get(deliveries::get_deliveries))
        .route("/health", get(health::health))
        .with_state(state);

    if let Some(metrics) = metrics {
        app = app
            .merge(
                Router::new()
                    .route("/metrics", get(render_metrics))
                    .with_state(metrics.clone()),
            )
            .route_layer(middleware::from_fn_with_state(metrics, track_metrics));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn render_metrics(State(metrics): State<Arc<AppMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            Body::from(body),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Failed to render metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}

/// Count and time every matched request, labelled by route template.
async fn track_metrics(
    State(metrics): State<Arc<AppMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let timer = metrics.http_request_duration.start_timer();
    let response = next.run(req).await;
    timer.observe_duration();

    metrics
        .http_requests_total
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::db::create_pool;

    async fn make_app(metrics: Option<Arc<AppMetrics>>) -> Router {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let state = AppState::new(
            Arc::new(IncidentRepository::new(pool)),
            None,
            Duration::from_secs(60),
        );
        create_router(state, metrics)
    }

    #[tokio::test]
    async fn metrics_route_absent_without_registry() {
        let app = make_app(None).await;
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn requests_are_counted_by_route_template() {
        let metrics = Arc::new(AppMetrics::new().unwrap());
        let app = make_app(Some(metrics.clone())).await;

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/incidents/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("path=\"/api/incidents/:id\""));
        assert!(text.contains("status=\"404\""));
    }

    #[tokio::test]
    async fn cors_headers_are_present() {
        let app = make_app(None).await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
