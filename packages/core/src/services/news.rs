//! NewsAPI source client.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::ingest::{
    error::{IngestError, IngestResult},
    provider::IncidentSource,
    types::{RawCandidate, Source},
};
use crate::services::http::{send_with_retry, RetryPolicy};

pub const DEFAULT_NEWS_URL: &str = "https://newsapi.org";

/// Search terms, in priority order.
pub const INCIDENT_KEYWORDS: &[&str] = &[
    "accident",
    "emergency",
    "police",
    "fire",
    "traffic",
    "closure",
    "incident",
    "alert",
    "warning",
];

#[derive(Clone)]
pub struct NewsClient {
    base_url: String,
    api_key: String,
    http: Client,
    retry: RetryPolicy,
    /// How many of [`INCIDENT_KEYWORDS`] to query per cycle (rate limits).
    keyword_budget: usize,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct Everything {
    #[serde(default)]
    articles: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

impl NewsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: Client::new(),
            retry: RetryPolicy::default(),
            keyword_budget: 3,
            page_size: 5,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn search(&self, keyword: &str, location: &str) -> Result<Vec<serde_json::Value>, String> {
        let query = format!("{} AND {}", keyword, location);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let page_size = self.page_size.to_string();

        let request = self
            .http
            .get(format!("{}/v2/everything", self.base_url))
            .query(&[
                ("q", query.as_str()),
                ("apiKey", self.api_key.as_str()),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("from", today.as_str()),
            ]);

        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(format!("NewsAPI returned HTTP {}", response.status()));
        }

        let body = response
            .json::<Everything>()
            .await
            .map_err(|err| err.to_string())?;
        Ok(body.articles)
    }
}

/// Turn one article into a candidate, skipping empty and removed ones.
fn article_candidate(location: &str, raw: serde_json::Value) -> Option<RawCandidate> {
    let article: Article = serde_json::from_value(raw.clone()).ok()?;
    let title = article.title.filter(|t| !t.trim().is_empty())?;
    let description = article.description.filter(|d| !d.trim().is_empty())?;
    if title.contains("[Removed]") {
        return None;
    }

    let mut candidate =
        RawCandidate::new(title, description, Source::News, location).with_raw_data(raw);
    if let Some(url) = article.url.filter(|u| !u.is_empty()) {
        candidate = candidate.with_url(url);
    }
    Some(candidate)
}

#[async_trait]
impl IncidentSource for NewsClient {
    async fn fetch(&self, location: &str) -> IngestResult<Vec<RawCandidate>> {
        let mut candidates = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0;

        for keyword in INCIDENT_KEYWORDS.iter().take(self.keyword_budget) {
            match self.search(keyword, location).await {
                Ok(articles) => {
                    succeeded += 1;
                    candidates.extend(
                        articles
                            .into_iter()
                            .filter_map(|a| article_candidate(location, a)),
                    );
                }
                Err(err) => {
                    tracing::warn!("News search '{}' for {} failed: {}", keyword, location, err);
                    last_error = Some(err);
                }
            }
        }

        if succeeded == 0 {
            if let Some(err) = last_error {
                return Err(IngestError::source_unavailable(self.provider_name(), err));
            }
        }

        tracing::info!("Fetched {} news candidates for {}", candidates.len(), location);
        Ok(candidates)
    }

    fn provider_name(&self) -> &str {
        "NewsAPI"
    }
}
