//! Configuration for the ingestion pipeline

use chrono::Duration;

/// Candidates scoring below this are discarded.
pub const MIN_RELEVANCE: f64 = 0.3;

/// Incidents must score strictly above this to trigger notifications.
pub const HIGH_PRIORITY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_relevance: f64,
    pub high_priority_threshold: f64,
    pub dedup: DedupPolicy,
}

/// How two candidates are judged to be the same real-world event.
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    pub window: Duration,
    pub case_insensitive: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_relevance: MIN_RELEVANCE,
            high_priority_threshold: HIGH_PRIORITY_THRESHOLD,
            dedup: DedupPolicy::default(),
        }
    }
}

/// Normal form of a title or location for case-insensitive duplicate
/// matching. The store persists this value, so the in-cycle check and the
/// database agree on non-ASCII text.
pub fn fold_key(text: &str) -> String {
    text.to_lowercase()
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            window: Duration::hours(24),
            case_insensitive: true,
        }
    }
}
