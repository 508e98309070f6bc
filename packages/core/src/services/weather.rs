//! OpenWeatherMap source client.
//!
//! Current conditions that indicate rough weather become candidates, and
//! any active government alerts for the location's coordinates are added
//! on top.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::ingest::{
    error::{IngestError, IngestResult},
    provider::IncidentSource,
    types::{RawCandidate, Severity, Source},
};
use crate::services::http::{send_with_retry, RetryPolicy};

pub const DEFAULT_WEATHER_URL: &str = "http://api.openweathermap.org";

/// Condition groups worth reporting.
const SEVERE_CONDITIONS: &[&str] = &["thunderstorm", "snow", "rain", "drizzle", "mist", "fog"];

#[derive(Clone)]
pub struct WeatherClient {
    base_url: String,
    api_key: String,
    http: Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    weather: Vec<Condition>,
    main: Option<Readings>,
    coord: Option<Coordinates>,
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(default)]
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Readings {
    temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OneCall {
    #[serde(default)]
    alerts: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WeatherAlert {
    event: Option<String>,
    description: Option<String>,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_current(&self, location: &str) -> IngestResult<serde_json::Value> {
        let request = self
            .http
            .get(format!("{}/data/2.5/weather", self.base_url))
            .query(&[
                ("q", location),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ]);

        let response = send_with_retry(request, &self.retry)
            .await
            .map_err(|err| IngestError::source_unavailable(self.provider_name(), err))?;

        if !response.status().is_success() {
            return Err(IngestError::source_unavailable(
                self.provider_name(),
                format!("OpenWeatherMap returned HTTP {}", response.status()),
            ));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|err| IngestError::source_unavailable(self.provider_name(), err.to_string()))
    }

    /// Active alerts near the given coordinates. Failures here are not
    /// fatal: the caller still reports current conditions.
    async fn fetch_alerts(&self, coord: &Coordinates) -> Result<Vec<serde_json::Value>, String> {
        let request = self
            .http
            .get(format!("{}/data/2.5/onecall", self.base_url))
            .query(&[
                ("lat", coord.lat.to_string()),
                ("lon", coord.lon.to_string()),
                ("appid", self.api_key.clone()),
                ("exclude", "minutely,hourly,daily".to_string()),
            ]);

        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(format!("alerts endpoint returned HTTP {}", response.status()));
        }

        let body = response
            .json::<OneCall>()
            .await
            .map_err(|err| err.to_string())?;
        Ok(body.alerts)
    }
}

fn condition_candidates(
    location: &str,
    payload: &serde_json::Value,
    current: &CurrentWeather,
) -> Vec<RawCandidate> {
    let temperature = current
        .main
        .as_ref()
        .and_then(|m| m.temp)
        .map(|t| t.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let city_url = format!(
        "https://openweathermap.org/city/{}",
        current.id.map(|id| id.to_string()).unwrap_or_default()
    );

    current
        .weather
        .iter()
        .filter(|condition| {
            let group = condition.main.to_lowercase();
            SEVERE_CONDITIONS.iter().any(|severe| group.contains(severe))
        })
        .map(|condition| {
            let label = if condition.main.is_empty() {
                "Unknown"
            } else {
                condition.main.as_str()
            };
            let candidate = RawCandidate::new(
                format!("Weather Alert: {}", label),
                format!(
                    "Current weather conditions: {}. Temperature: {}°C",
                    condition.description, temperature
                ),
                Source::Weather,
                location,
            )
            .with_url(city_url.clone())
            .with_raw_data(payload.clone());

            if condition.main.eq_ignore_ascii_case("thunderstorm") {
                candidate.with_severity_hint(Severity::High)
            } else {
                candidate
            }
        })
        .collect()
}

fn alert_candidate(location: &str, raw: serde_json::Value) -> RawCandidate {
    let alert: WeatherAlert = serde_json::from_value(raw.clone()).unwrap_or(WeatherAlert {
        event: None,
        description: None,
    });

    RawCandidate::new(
        format!(
            "Weather Alert: {}",
            alert.event.as_deref().unwrap_or("Weather Warning")
        ),
        alert
            .description
            .unwrap_or_else(|| "Weather alert issued for your area".to_string()),
        Source::Weather,
        location,
    )
    .with_url("https://openweathermap.org")
    .with_severity_hint(Severity::High)
    .with_raw_data(raw)
}

#[async_trait]
impl IncidentSource for WeatherClient {
    async fn fetch(&self, location: &str) -> IngestResult<Vec<RawCandidate>> {
        let payload = self.fetch_current(location).await?;
        let current: CurrentWeather = serde_json::from_value(payload.clone())
            .map_err(|err| IngestError::source_unavailable(self.provider_name(), err.to_string()))?;

        let mut candidates = condition_candidates(location, &payload, &current);

        if let Some(coord) = current.coord.as_ref() {
            match self.fetch_alerts(coord).await {
                Ok(alerts) => {
                    candidates.extend(alerts.into_iter().map(|a| alert_candidate(location, a)));
                }
                Err(err) => {
                    tracing::warn!("Weather alerts unavailable for {}: {}", location, err);
                }
            }
        }

        tracing::info!("Fetched {} weather candidates for {}", candidates.len(), location);
        Ok(candidates)
    }

    fn provider_name(&self) -> &str {
        "OpenWeatherMap"
    }
}
