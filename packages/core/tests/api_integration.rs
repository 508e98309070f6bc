//! Integration tests for all API endpoints.
//!
//! Each test boots the full Axum router (same assembly as `main.rs`) using
//! `tower::ServiceExt::oneshot`. No live server or vendor API is needed.
//!
//! `build_test_app()` wires together:
//! - An in-memory SQLite pool with all migrations applied
//! - An `IncidentRepository` pre-populated with incidents and a delivery
//! - A `MockSummarizer` standing in for the language model
//! - Prometheus `AppMetrics`
//! - The complete `Router<()>` returned ready for `oneshot`

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use cityguard::{
    api::{self, AppState},
    db,
    ingest::{DeliveryRecord, DeliveryStatus, NewIncident, RawCandidate, Severity, Source, Verdict},
    metrics::AppMetrics,
    repository::{IncidentRepository, InsertOutcome},
    services::mock::MockSummarizer,
};

// ---- Helpers ----------------------------------------------------------------

struct Seed {
    title: &'static str,
    source: Source,
    severity: Severity,
    score: f64,
    age_hours: i64,
}

const SEEDS: &[Seed] = &[
    Seed { title: "Water main break", source: Source::News, severity: Severity::High, score: 0.85, age_hours: 2 },
    Seed { title: "Heat advisory", source: Source::Weather, severity: Severity::Medium, score: 0.6, age_hours: 1 },
    Seed { title: "Tornado warning", source: Source::Weather, severity: Severity::Critical, score: 0.95, age_hours: 3 },
    Seed { title: "Bake sale", source: Source::News, severity: Severity::Low, score: 0.35, age_hours: 4 },
    Seed { title: "Old flood", source: Source::Weather, severity: Severity::High, score: 0.9, age_hours: 48 },
];

async fn seed_incidents(repository: &IncidentRepository) -> Vec<i64> {
    let mut ids = Vec::new();
    for seed in SEEDS {
        let candidate = RawCandidate::new(seed.title, "seeded", seed.source, "Springfield");
        let verdict = Verdict::new(seed.score, seed.severity, "seeded", true, seed.title);
        let incident = NewIncident::from_classified(
            &candidate,
            &verdict,
            Utc::now() - Duration::hours(seed.age_hours),
        );
        match repository.insert_incident(&incident).await.unwrap() {
            InsertOutcome::Inserted(stored) => ids.push(stored.id),
            InsertOutcome::Duplicate(id) => panic!("seed collided with {}", id),
        }
    }
    ids
}

/// Build the complete test router.
///
/// Returns the router plus the summarizer handle so tests can count model
/// calls.
async fn build_test_app() -> (Router, MockSummarizer, Vec<i64>) {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let repository = Arc::new(IncidentRepository::new(pool));
    let ids = seed_incidents(&repository).await;

    let summarizer = MockSummarizer::new("Severe weather and a water main break.");
    let state = AppState::new(
        repository,
        Some(Arc::new(summarizer.clone())),
        StdDuration::from_secs(300),
    );
    let metrics = Arc::new(AppMetrics::new().unwrap());

    (api::create_router(state, Some(metrics)), summarizer, ids)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Convenience: collect body bytes and parse as JSON.
async fn json_body(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---- GET /health ------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_with_ok_body() {
    let (app, _, _) = build_test_app().await;
    let resp = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

// ---- GET /api/incidents -----------------------------------------------------

#[tokio::test]
async fn incidents_default_query_is_last_day_sorted_by_score() {
    let (app, _, _) = build_test_app().await;
    let resp = app.oneshot(get("/api/incidents")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["count"], 4);

    let titles: Vec<&str> = json["incidents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["title"].as_str().unwrap())
        .collect();
    assert_eq!(
        titles,
        vec!["Tornado warning", "Water main break", "Heat advisory", "Bake sale"]
    );
}

#[tokio::test]
async fn incidents_filters_combine() {
    let (app, _, _) = build_test_app().await;
    let resp = app
        .oneshot(get("/api/incidents?hours=72&min_relevance=0.8&source=weather"))
        .await
        .unwrap();

    let json = json_body(resp.into_body()).await;
    let titles: Vec<&str> = json["incidents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Tornado warning", "Old flood"]);
}

#[tokio::test]
async fn incidents_limit_is_respected() {
    let (app, _, _) = build_test_app().await;
    let resp = app.oneshot(get("/api/incidents?limit=2")).await.unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["count"], 2);
}

#[tokio::test]
async fn incidents_invalid_filters_return_400() {
    let (app, _, _) = build_test_app().await;
    for uri in [
        "/api/incidents?source=radio",
        "/api/incidents?severity=extreme",
        "/api/incidents?min_relevance=1.5",
        "/api/incidents?hours=0",
        "/api/incidents?hours=3000000000",
    ] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let json = json_body(resp.into_body()).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn incident_by_id_and_missing_id() {
    let (app, _, ids) = build_test_app().await;

    let resp = app
        .clone()
        .oneshot(get(&format!("/api/incidents/{}", ids[0])))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["incident"]["title"], "Water main break");

    let resp = app.oneshot(get("/api/incidents/9999")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["error"], "Incident not found");
}

#[tokio::test]
async fn non_numeric_ids_return_json_400() {
    let (app, _, _) = build_test_app().await;
    let requests = [
        get("/api/incidents/abc"),
        json_request(Method::PATCH, "/api/subscribers/abc", json!({ "active": false })),
        Request::builder()
            .method(Method::DELETE)
            .uri("/api/subscribers/1x")
            .body(Body::empty())
            .unwrap(),
    ];

    for request in requests {
        let uri = request.uri().to_string();
        let resp = app.clone().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let json = json_body(resp.into_body()).await;
        assert_eq!(json["success"], false, "{}", uri);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid id"));
    }
}

#[tokio::test]
async fn incidents_by_severity_returns_only_that_tier() {
    let (app, _, _) = build_test_app().await;
    let resp = app
        .clone()
        .oneshot(get("/api/incidents/by-severity/high"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["severity"], "high");
    for incident in json["incidents"].as_array().unwrap() {
        assert_eq!(incident["severity"], "high");
    }

    let resp = app
        .oneshot(get("/api/incidents/by-severity/apocalyptic"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- GET /api/stats ---------------------------------------------------------

#[tokio::test]
async fn stats_count_last_day_only() {
    let (app, _, _) = build_test_app().await;
    let resp = app.oneshot(get("/api/stats")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    let stats = &json["stats"];
    assert_eq!(stats["total_incidents_24h"], 4);
    assert_eq!(stats["critical_incidents_24h"], 1);
    assert_eq!(stats["high_incidents_24h"], 1);
    assert_eq!(stats["weather_incidents_24h"], 2);
    assert_eq!(stats["news_incidents_24h"], 2);
    assert_eq!(stats["active_subscribers"], 0);
}

// ---- GET /api/summary -------------------------------------------------------

#[tokio::test]
async fn summary_is_cached_and_supports_conditional_requests() {
    let (app, summarizer, _) = build_test_app().await;

    let first = app.clone().oneshot(get("/api/summary")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_string();
    assert!(etag.starts_with("W/\""));
    let cache_control = first.headers()[header::CACHE_CONTROL].to_str().unwrap().to_string();
    assert!(cache_control.starts_with("public, max-age="));

    let json = json_body(first.into_body()).await;
    assert_eq!(json["summary"], "Severe weather and a water main break.");
    assert_eq!(json["incident_count"], 4);

    let second = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .header(header::IF_NONE_MATCH, &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);

    let third = app.oneshot(get("/api/summary")).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
    assert_eq!(summarizer.calls(), 1);
}

// ---- Subscribers ------------------------------------------------------------

#[tokio::test]
async fn subscriber_lifecycle() {
    let (app, _, _) = build_test_app().await;

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/subscribers",
            json!({
                "email": "resident@example.com",
                "location": "Springfield",
                "severity_threshold": "high",
                "categories": ["weather", "safety"]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = json_body(resp.into_body()).await;
    let id = json["subscriber"]["id"].as_i64().unwrap();

    let resp = app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/subscribers/{}", id),
            json!({ "active": false }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["subscriber"]["active"], false);
    assert_eq!(json["subscriber"]["severity_threshold"], "high");

    let resp = app.clone().oneshot(get("/api/stats")).await.unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["stats"]["active_subscribers"], 0);

    let resp = app
        .oneshot(json_request(
            Method::PATCH,
            "/api/subscribers/9999",
            json!({ "active": true }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ---- GET /api/deliveries ----------------------------------------------------

#[tokio::test]
async fn deliveries_list_and_filter() {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let repository = Arc::new(IncidentRepository::new(pool));
    let ids = seed_incidents(&repository).await;
    let subscriber = repository
        .insert_subscriber(&cityguard::repository::NewSubscriber {
            email: "log@example.com".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    for (incident_id, status) in [(ids[0], DeliveryStatus::Sent), (ids[2], DeliveryStatus::Failed)] {
        repository
            .record_delivery(&DeliveryRecord {
                id: None,
                incident_id,
                subscriber_id: subscriber,
                channel: "email".to_string(),
                status,
                error_message: None,
                attempted_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let app = api::create_router(
        AppState::new(repository, None, StdDuration::from_secs(60)),
        None,
    );

    let resp = app.clone().oneshot(get("/api/deliveries")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["items"].as_array().unwrap().len(), 2);

    let resp = app
        .clone()
        .oneshot(get("/api/deliveries?status=failed"))
        .await
        .unwrap();
    let json = json_body(resp.into_body()).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"][0]["status"], "failed");

    let resp = app.oneshot(get("/api/deliveries?status=bounced")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---- GET /metrics -----------------------------------------------------------

#[tokio::test]
async fn metrics_exposes_registry_in_text_format() {
    let (app, _, _) = build_test_app().await;
    app.clone().oneshot(get("/api/stats")).await.unwrap();

    let resp = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4"
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("cityguard_http_requests_total"));
    assert!(text.contains("path=\"/api/stats\""));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (app, _, _) = build_test_app().await;
    let resp = app.oneshot(get("/fees/current")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
