//! Per-location ingestion cycle.
//!
//! One cycle walks a location through
//! `Idle → Fetching → Classifying → Persisting → Notifying → Idle`.
//! Every failure below the cycle level (a source, a candidate, a delivery)
//! is logged, counted in the [`CycleReport`] and skipped; a cycle itself
//! never fails.
//!
//! Stage tracking is per location. A cycle requested while the same
//! location is already mid-cycle is skipped rather than queued, and the
//! stage falls back to `Idle` when the cycle's guard is dropped, including
//! when the cycle future is cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::alerts::notifier::Notifier;
use crate::ingest::{
    config::{fold_key, PipelineConfig},
    provider::{Classifier, IncidentSource},
    types::{Incident, NewIncident, RawCandidate, Source, Verdict},
};
use crate::metrics::AppMetrics;
use crate::repository::{IncidentRepository, InsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Idle,
    Fetching,
    Classifying,
    Persisting,
    Notifying,
}

/// Counters for one cycle of one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub location: String,
    /// The location was already mid-cycle; nothing ran.
    pub skipped: bool,
    pub fetched: usize,
    /// Providers that failed to produce candidates.
    pub failed_sources: Vec<String>,
    pub duplicates: usize,
    pub classification_failures: usize,
    /// Not credible, or below the relevance floor.
    pub discarded: usize,
    pub persistence_failures: usize,
    pub stored: usize,
    /// Ids of incidents created this cycle.
    pub incident_ids: Vec<i64>,
    /// Deliveries sent.
    pub notified: usize,
    pub delivery_failures: usize,
}

impl CycleReport {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }
}

type StageMap = Mutex<HashMap<String, CycleStage>>;

fn lock_stages(stages: &StageMap) -> std::sync::MutexGuard<'_, HashMap<String, CycleStage>> {
    stages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a location's stage for the length of one cycle.
struct CycleGuard<'a> {
    stages: &'a StageMap,
    location: String,
}

impl<'a> CycleGuard<'a> {
    fn acquire(stages: &'a StageMap, location: &str) -> Option<Self> {
        let mut map = lock_stages(stages);
        match map.get(location) {
            Some(stage) if *stage != CycleStage::Idle => None,
            _ => {
                map.insert(location.to_string(), CycleStage::Fetching);
                Some(Self {
                    stages,
                    location: location.to_string(),
                })
            }
        }
    }

    fn advance(&self, stage: CycleStage) {
        lock_stages(self.stages).insert(self.location.clone(), stage);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        lock_stages(self.stages).insert(self.location.clone(), CycleStage::Idle);
    }
}

pub struct IngestionPipeline {
    sources: Vec<Arc<dyn IncidentSource>>,
    classifier: Arc<dyn Classifier>,
    repository: Arc<IncidentRepository>,
    notifier: Option<Arc<Notifier>>,
    metrics: Option<Arc<AppMetrics>>,
    config: PipelineConfig,
    stages: StageMap,
}

impl IngestionPipeline {
    pub fn new(
        sources: Vec<Arc<dyn IncidentSource>>,
        classifier: Arc<dyn Classifier>,
        repository: Arc<IncidentRepository>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sources,
            classifier,
            repository,
            notifier: None,
            metrics: None,
            config,
            stages: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current stage of `location`; unknown locations are `Idle`.
    pub fn stage(&self, location: &str) -> CycleStage {
        lock_stages(&self.stages)
            .get(location)
            .copied()
            .unwrap_or(CycleStage::Idle)
    }

    /// Run one full cycle for `location`.
    pub async fn run_cycle(&self, location: &str) -> CycleReport {
        let mut report = CycleReport::new(location);

        let Some(guard) = CycleGuard::acquire(&self.stages, location) else {
            tracing::warn!("Cycle for {} still running, skipping this one", location);
            report.skipped = true;
            self.record(&report);
            return report;
        };

        let candidates = self.fetch_all(location, &mut report).await;

        guard.advance(CycleStage::Classifying);
        let accepted = self.classify_all(candidates, &mut report).await;

        guard.advance(CycleStage::Persisting);
        let stored = self.persist_all(accepted, &mut report).await;

        guard.advance(CycleStage::Notifying);
        if let Some(notifier) = &self.notifier {
            for incident in &stored {
                match notifier.notify(incident).await {
                    Ok(outcome) => {
                        report.notified += outcome.sent;
                        report.delivery_failures += outcome.failed;
                    }
                    Err(err) => {
                        tracing::error!("Notifying incident {} failed: {}", incident.id, err);
                        report.delivery_failures += 1;
                    }
                }
            }
        }

        drop(guard);

        tracing::info!(
            "Cycle for {}: {} fetched, {} stored, {} duplicates, {} discarded, {} classification failures, {} notified",
            location,
            report.fetched,
            report.stored,
            report.duplicates,
            report.discarded,
            report.classification_failures,
            report.notified
        );
        self.record(&report);
        report
    }

    fn record(&self, report: &CycleReport) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(report);
        }
    }

    async fn fetch_all(&self, location: &str, report: &mut CycleReport) -> Vec<RawCandidate> {
        let mut candidates = Vec::new();
        for source in &self.sources {
            match source.fetch(location).await {
                Ok(batch) => candidates.extend(batch),
                Err(err) => {
                    tracing::warn!("{}", err);
                    report.failed_sources.push(source.provider_name().to_string());
                }
            }
        }
        report.fetched = candidates.len();
        candidates
    }

    /// Classify each new candidate; returns the ones worth keeping.
    async fn classify_all(
        &self,
        candidates: Vec<RawCandidate>,
        report: &mut CycleReport,
    ) -> Vec<(RawCandidate, Verdict)> {
        let mut accepted = Vec::new();
        let mut seen = HashSet::new();
        let fold = self.repository.dedup_policy().case_insensitive;

        for candidate in candidates {
            let key = dedup_key(&candidate, fold);
            if !seen.insert(key) {
                report.duplicates += 1;
                continue;
            }

            // Known events are not re-classified.
            match self
                .repository
                .touch_duplicate(
                    &candidate.title,
                    &candidate.location,
                    candidate.source,
                    Utc::now(),
                )
                .await
            {
                Ok(Some(id)) => {
                    tracing::debug!("'{}' duplicates incident {}", candidate.title, id);
                    report.duplicates += 1;
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!("Duplicate check for '{}' failed: {}", candidate.title, err);
                    report.persistence_failures += 1;
                    continue;
                }
            }

            let mut verdict = match self.classifier.classify(&candidate).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    tracing::warn!("Skipping '{}': {}", candidate.title, err);
                    report.classification_failures += 1;
                    continue;
                }
            };

            if verdict.is_credible {
                match self.classifier.assess_credibility(&candidate).await {
                    Ok(true) => {}
                    Ok(false) => verdict.discredit(),
                    Err(err) => {
                        tracing::debug!(
                            "Credibility check for '{}' failed, keeping verdict: {}",
                            candidate.title,
                            err
                        );
                    }
                }
            }

            if !verdict.is_credible || verdict.relevance_score < self.config.min_relevance {
                tracing::debug!(
                    "Discarding '{}' (credible: {}, relevance: {:.2})",
                    candidate.title,
                    verdict.is_credible,
                    verdict.relevance_score
                );
                report.discarded += 1;
                continue;
            }

            accepted.push((candidate, verdict));
        }

        accepted
    }

    async fn persist_all(
        &self,
        accepted: Vec<(RawCandidate, Verdict)>,
        report: &mut CycleReport,
    ) -> Vec<Incident> {
        let mut stored = Vec::new();

        for (candidate, verdict) in accepted {
            let new_incident = NewIncident::from_classified(&candidate, &verdict, Utc::now());
            match self.repository.insert_incident(&new_incident).await {
                Ok(InsertOutcome::Inserted(incident)) => {
                    tracing::debug!("Stored incident {}: {}", incident.id, incident.title);
                    report.stored += 1;
                    report.incident_ids.push(incident.id);
                    stored.push(incident);
                }
                Ok(InsertOutcome::Duplicate(_)) => report.duplicates += 1,
                Err(err) => {
                    tracing::error!("Failed to store '{}': {}", candidate.title, err);
                    report.persistence_failures += 1;
                }
            }
        }

        stored
    }
}

/// Identity of a candidate within one cycle, mirroring the store's rule.
fn dedup_key(candidate: &RawCandidate, case_insensitive: bool) -> (Source, String, String) {
    if case_insensitive {
        (
            candidate.source,
            fold_key(&candidate.title),
            fold_key(&candidate.location),
        )
    } else {
        (
            candidate.source,
            candidate.title.clone(),
            candidate.location.clone(),
        )
    }
}
