//! Collaborator interfaces
//!
//! The pipeline only sees these traits, so the vendor clients in
//! `services` can be swapped for the fakes in `services::mock`.

use async_trait::async_trait;

use crate::ingest::{
    error::IngestResult,
    types::{Incident, RawCandidate, Verdict},
};

/// A feed of raw incident candidates for a location.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Fetch the current candidates for `location`.
    async fn fetch(&self, location: &str) -> IngestResult<Vec<RawCandidate>>;

    /// Name used in logs and error messages.
    fn provider_name(&self) -> &str;
}

/// Turns a raw candidate into a structured verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, candidate: &RawCandidate) -> IngestResult<Verdict>;

    /// Independent check of whether the candidate comes from a credible
    /// outlet. Classifiers without such a check accept everything.
    async fn assess_credibility(&self, _candidate: &RawCandidate) -> IngestResult<bool> {
        Ok(true)
    }
}

/// Produces a short digest of several incidents for the dashboard.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, incidents: &[Incident]) -> IngestResult<String>;
}
