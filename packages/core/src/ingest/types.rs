//! Core data types for incident ingestion

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity tier, ordered by increasing urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Numeric rank, 1 (low) through 4 (critical).
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// Map an arbitrary vendor label onto the four tiers.
    /// Anything unrecognised becomes `Medium`.
    pub fn coerce(label: &str) -> Self {
        label.parse().unwrap_or(Severity::Medium)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "Invalid severity '{}'. Must be one of: low, medium, high, critical",
                other
            )),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which upstream feed produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Weather,
    News,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Weather => "weather",
            Source::News => "news",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weather" => Ok(Source::Weather),
            "news" => Ok(Source::News),
            other => Err(format!(
                "Invalid source '{}'. Must be one of: weather, news",
                other
            )),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unclassified item as returned by a source client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidate {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub source: Source,
    pub location: String,
    /// Structured severity the vendor itself attached, if any.
    pub severity_hint: Option<Severity>,
    /// Original vendor payload, kept for audit.
    pub raw_data: Option<serde_json::Value>,
}

impl RawCandidate {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        source: Source,
        location: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            url: None,
            source,
            location: location.into(),
            severity_hint: None,
            raw_data: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_severity_hint(mut self, hint: Severity) -> Self {
        self.severity_hint = Some(hint);
        self
    }

    pub fn with_raw_data(mut self, raw: serde_json::Value) -> Self {
        self.raw_data = Some(raw);
        self
    }
}

/// Verdict exactly as a model returns it, before coercion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawVerdict {
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub is_credible: bool,
    #[serde(default)]
    pub summary: String,
}

/// Structured classification of a single candidate.
///
/// Always satisfies `0.0 <= relevance_score <= 1.0`; construct through
/// [`Verdict::from_raw`] or [`Verdict::new`] to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub relevance_score: f64,
    pub severity: Severity,
    pub category: String,
    pub is_credible: bool,
    pub summary: String,
}

impl Verdict {
    pub fn new(
        relevance_score: f64,
        severity: Severity,
        category: impl Into<String>,
        is_credible: bool,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            relevance_score: clamp_score(relevance_score),
            severity,
            category: normalize_category(&category.into()),
            is_credible,
            summary: summary.into(),
        }
    }

    /// Coerce a model response into a valid verdict for `candidate`.
    pub fn from_raw(raw: RawVerdict, candidate: &RawCandidate) -> Self {
        let summary = if raw.summary.trim().is_empty() {
            fallback_summary(candidate)
        } else {
            raw.summary.trim().to_string()
        };

        Self {
            relevance_score: clamp_score(raw.relevance_score),
            severity: Severity::coerce(&raw.severity),
            category: normalize_category(&raw.category),
            is_credible: raw.is_credible,
            summary,
        }
    }

    /// Apply a negative credibility cross-check: the candidate is marked
    /// not credible and its relevance halved.
    pub fn discredit(&mut self) {
        self.is_credible = false;
        self.relevance_score = clamp_score(self.relevance_score * 0.5);
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn normalize_category(category: &str) -> String {
    let trimmed = category.trim().to_lowercase();
    if trimmed.is_empty() {
        "other".to_string()
    } else {
        trimmed
    }
}

fn fallback_summary(candidate: &RawCandidate) -> String {
    let excerpt: String = candidate.description.chars().take(100).collect();
    format!("{}: {}...", candidate.title, excerpt)
}

/// A classified, persisted incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub source: Source,
    pub location: String,
    pub severity: Severity,
    pub category: String,
    pub url: Option<String>,
    pub ai_summary: Option<String>,
    pub relevance_score: f64,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An incident ready to be written: a candidate plus its verdict.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub title: String,
    pub description: String,
    pub source: Source,
    pub location: String,
    pub severity: Severity,
    pub category: String,
    pub url: Option<String>,
    pub ai_summary: Option<String>,
    pub relevance_score: f64,
    pub is_verified: bool,
    pub raw_data: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl NewIncident {
    pub fn from_classified(
        candidate: &RawCandidate,
        verdict: &Verdict,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            source: candidate.source,
            location: candidate.location.clone(),
            severity: verdict.severity,
            category: verdict.category.clone(),
            url: candidate.url.clone().filter(|u| !u.is_empty()),
            ai_summary: Some(verdict.summary.clone()),
            relevance_score: verdict.relevance_score,
            is_verified: verdict.is_credible,
            raw_data: candidate.raw_data.as_ref().map(|v| v.to_string()),
            observed_at,
        }
    }
}

/// A notification recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    /// When set, only incidents whose location overlaps this one are delivered.
    pub location: Option<String>,
    pub severity_threshold: Severity,
    /// Empty means every category.
    pub categories: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    /// Whether this subscriber should hear about `incident`.
    pub fn wants(&self, incident: &Incident) -> bool {
        if !self.active {
            return false;
        }
        if incident.severity.rank() < self.severity_threshold.rank() {
            return false;
        }
        if !self.categories.is_empty()
            && !self
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&incident.category))
        {
            return false;
        }
        match self.location.as_deref().map(str::trim) {
            Some(loc) if !loc.is_empty() => {
                let mine = loc.to_lowercase();
                let theirs = incident.location.to_lowercase();
                mine.contains(&theirs) || theirs.contains(&mine)
            }
            _ => true,
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!(
                "Invalid status '{}'. Must be one of: sent, failed",
                other
            )),
        }
    }
}

/// One row of the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Option<i64>,
    pub incident_id: i64,
    pub subscriber_id: i64,
    pub channel: String,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub attempted_at: DateTime<Utc>,
}
