//! Subscriber management.
//!
//! Routes:
//! - `POST   /api/subscribers`        register (409 if the e-mail exists)
//! - `GET    /api/subscribers`        list, including inactive ones
//! - `PATCH  /api/subscribers/:id`    update preferences / active flag
//! - `DELETE /api/subscribers/:id`    soft delete (sets active = false)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{parse_id, AppState};
use crate::error::AppError;
use crate::ingest::types::{Severity, Subscriber};
use crate::repository::NewSubscriber;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriberRequest {
    pub email: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub severity_threshold: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubscriberRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub severity_threshold: Option<String>,
    pub categories: Option<Vec<String>>,
    pub active: Option<bool>,
}

fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if valid && !email.contains(char::is_whitespace) {
        Ok(email.to_string())
    } else {
        Err(AppError::BadRequest(format!("Invalid email address '{}'", email)))
    }
}

fn parse_threshold(raw: Option<&str>) -> Result<Option<Severity>, AppError> {
    raw.map(|s| s.parse::<Severity>().map_err(AppError::BadRequest))
        .transpose()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn load(state: &AppState, id: i64) -> Result<Subscriber, AppError> {
    state
        .repository
        .get_subscriber(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Subscriber not found".to_string()))
}

/// `POST /api/subscribers`
pub async fn create_subscriber(
    State(state): State<AppState>,
    Json(body): Json<CreateSubscriberRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let new = NewSubscriber {
        email: validate_email(&body.email)?,
        name: non_blank(body.name),
        location: non_blank(body.location),
        severity_threshold: parse_threshold(body.severity_threshold.as_deref())?,
        categories: body.categories,
    };

    let id = state.repository.insert_subscriber(&new).await.map_err(|err| {
        if unique_violation(&err) {
            AppError::Conflict(format!("Email '{}' is already subscribed", new.email))
        } else {
            err.into()
        }
    })?;

    let subscriber = load(&state, id).await?;
    tracing::info!("Subscriber {} registered", subscriber.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "subscriber": subscriber })),
    ))
}

/// `GET /api/subscribers`
pub async fn list_subscribers(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let subscribers = state.repository.list_subscribers().await?;
    Ok(Json(json!({
        "success": true,
        "count": subscribers.len(),
        "subscribers": subscribers,
    })))
}

/// `PATCH /api/subscribers/:id`
pub async fn update_subscriber(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSubscriberRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let mut subscriber = load(&state, id).await?;

    if let Some(threshold) = parse_threshold(body.severity_threshold.as_deref())? {
        subscriber.severity_threshold = threshold;
    }
    if body.name.is_some() {
        subscriber.name = non_blank(body.name);
    }
    if body.location.is_some() {
        subscriber.location = non_blank(body.location);
    }
    if let Some(categories) = body.categories {
        subscriber.categories = categories;
    }
    if let Some(active) = body.active {
        subscriber.active = active;
    }

    if !state.repository.update_subscriber(&subscriber).await? {
        return Err(AppError::NotFound("Subscriber not found".to_string()));
    }

    let subscriber = load(&state, id).await?;
    Ok(Json(json!({ "success": true, "subscriber": subscriber })))
}

/// `DELETE /api/subscribers/:id`
pub async fn delete_subscriber(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.repository.deactivate_subscriber(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Subscriber not found".to_string()))
    }
}
