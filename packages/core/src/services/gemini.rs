//! Google Gemini client.
//!
//! Implements the three AI collaborators the service needs: structured
//! incident classification, a yes/no credibility check, and the dashboard
//! digest. All calls go through `models/{model}:generateContent`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ingest::{
    error::{IngestError, IngestResult},
    provider::{Classifier, Summarizer},
    types::{Incident, RawCandidate, RawVerdict, Verdict},
};
use crate::services::http::{send_with_retry, RetryPolicy};

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

const CLASSIFY_INSTRUCTION: &str = "You are an expert incident analyst for a local alert system. \
Analyze the following incident and provide a structured assessment. \
Relevance score should be 0.0-1.0 (1.0 = highly relevant to local safety). \
Severity should be: low, medium, high, or critical. \
Category should be one of: weather, traffic, crime, emergency, infrastructure, health, other. \
Is_credible should assess if this is from a reliable source and not misinformation. \
Summary should be a concise 1-2 sentence summary suitable for alerts. \
Consider local impact and immediate relevance to residents.";

/// Connection settings for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub base_url: String,
    pub api_key: String,
    /// Model used for classification.
    pub model: String,
    /// Cheaper model used for credibility checks and summaries.
    pub fast_model: String,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            api_key: api_key.into(),
            model: "gemini-2.5-pro".to_string(),
            fast_model: "gemini-2.5-flash".to_string(),
        }
    }
}

pub struct GeminiClient {
    settings: GeminiSettings,
    http: Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn verdict_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "relevance_score": { "type": "NUMBER" },
            "severity": { "type": "STRING", "enum": ["low", "medium", "high", "critical"] },
            "category": { "type": "STRING" },
            "is_credible": { "type": "BOOLEAN" },
            "summary": { "type": "STRING" }
        },
        "required": ["relevance_score", "severity", "category", "is_credible", "summary"]
    })
}

fn describe_candidate(candidate: &RawCandidate) -> String {
    let mut text = format!(
        "Title: {}\nDescription: {}\nSource: {}\nLocation: {}",
        candidate.title, candidate.description, candidate.source, candidate.location
    );
    if let Some(hint) = candidate.severity_hint {
        text.push_str(&format!("\nSource severity hint: {}", hint));
    }
    text
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            http: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate(&self, model: &str, body: Value) -> IngestResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            model
        );
        let request = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&body);

        let response = send_with_retry(request, &self.retry)
            .await
            .map_err(IngestError::classification_unavailable)?;

        if !response.status().is_success() {
            return Err(IngestError::classification_unavailable(format!(
                "Gemini returned HTTP {}",
                response.status()
            )));
        }

        let parsed = response
            .json::<GenerateResponse>()
            .await
            .map_err(|err| IngestError::classification_unavailable(err.to_string()))?;

        parsed
            .text()
            .ok_or_else(|| IngestError::classification_unavailable("Empty response from Gemini model"))
    }
}

#[async_trait]
impl Classifier for GeminiClient {
    async fn classify(&self, candidate: &RawCandidate) -> IngestResult<Verdict> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": CLASSIFY_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": describe_candidate(candidate) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": verdict_schema()
            }
        });

        let text = self.generate(&self.settings.model, body).await?;
        tracing::debug!("Gemini analysis response: {}", text);

        let raw: RawVerdict = serde_json::from_str(&text).map_err(|err| {
            IngestError::classification_unavailable(format!("Unparseable verdict: {}", err))
        })?;

        Ok(Verdict::from_raw(raw, candidate))
    }

    async fn assess_credibility(&self, candidate: &RawCandidate) -> IngestResult<bool> {
        let excerpt: String = candidate.description.chars().take(500).collect();
        let prompt = format!(
            "Assess if this content appears to be from a credible news or weather source. \
             Consider: official sources, known news outlets, weather services, government agencies. \
             Return only 'true' or 'false'.\n\nContent: {}\nSource URL: {}",
            excerpt,
            candidate.url.as_deref().unwrap_or("")
        );
        let body = json!({ "contents": [{ "role": "user", "parts": [{ "text": prompt }] }] });

        let text = self.generate(&self.settings.fast_model, body).await?;
        Ok(text.trim().trim_matches('\'').eq_ignore_ascii_case("true"))
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize(&self, incidents: &[Incident]) -> IngestResult<String> {
        let listing = incidents
            .iter()
            .take(10)
            .map(|incident| {
                let detail = incident
                    .ai_summary
                    .as_deref()
                    .unwrap_or(&incident.description);
                let detail: String = detail.chars().take(100).collect();
                format!("- {}: {}", incident.title, detail)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Create a brief, clear summary of these local incidents for a safety dashboard. \
             Focus on the most important information residents need to know. \
             Use bullet points and keep it under 200 words:\n\n{}",
            listing
        );
        let body = json!({ "contents": [{ "role": "user", "parts": [{ "text": prompt }] }] });

        self.generate(&self.settings.fast_model, body).await
    }
}
