//! In-memory collaborators for tests and offline runs.
//!
//! Each fake is configured up front with builder methods and records how
//! often it was called, so tests can assert on both the outcome and the
//! traffic that produced it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::alerts::email::{Mailer, OutgoingEmail};
use crate::ingest::{
    error::{IngestError, IngestResult},
    provider::{Classifier, IncidentSource, Summarizer},
    types::{Incident, RawCandidate, Severity, Source, Verdict},
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---- Sources ----

/// Returns the same candidates on every fetch, relocated to the requested
/// location.
#[derive(Clone)]
pub struct MockSource {
    source: Source,
    candidates: Vec<RawCandidate>,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            candidates: Vec::new(),
            error: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<RawCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncidentSource for MockSource {
    async fn fetch(&self, location: &str) -> IngestResult<Vec<RawCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(IngestError::source_unavailable(self.provider_name(), message.clone()));
        }

        Ok(self
            .candidates
            .iter()
            .cloned()
            .map(|mut c| {
                c.source = self.source;
                c.location = location.to_string();
                c
            })
            .collect())
    }

    fn provider_name(&self) -> &str {
        match self.source {
            Source::Weather => "mock-weather",
            Source::News => "mock-news",
        }
    }
}

// ---- Classifier ----

/// Classifier keyed by candidate title, with a fallback verdict.
#[derive(Clone)]
pub struct MockClassifier {
    default_verdict: Verdict,
    verdicts: HashMap<String, Result<Verdict, String>>,
    credibility: HashMap<String, Result<bool, String>>,
    classify_calls: Arc<AtomicUsize>,
    credibility_calls: Arc<AtomicUsize>,
}

impl MockClassifier {
    pub fn new(default_verdict: Verdict) -> Self {
        Self {
            default_verdict,
            verdicts: HashMap::new(),
            credibility: HashMap::new(),
            classify_calls: Arc::new(AtomicUsize::new(0)),
            credibility_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_verdict(mut self, title: impl Into<String>, verdict: Verdict) -> Self {
        self.verdicts.insert(title.into(), Ok(verdict));
        self
    }

    pub fn with_failure(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.verdicts.insert(title.into(), Err(message.into()));
        self
    }

    pub fn with_credibility(mut self, title: impl Into<String>, credible: bool) -> Self {
        self.credibility.insert(title.into(), Ok(credible));
        self
    }

    pub fn with_credibility_failure(
        mut self,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.credibility.insert(title.into(), Err(message.into()));
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn credibility_calls(&self) -> usize {
        self.credibility_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new(Verdict::new(
            0.5,
            Severity::Medium,
            "other",
            true,
            "Mock classification",
        ))
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, candidate: &RawCandidate) -> IngestResult<Verdict> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        match self.verdicts.get(&candidate.title) {
            Some(Ok(verdict)) => Ok(verdict.clone()),
            Some(Err(message)) => Err(IngestError::classification_unavailable(message.clone())),
            None => Ok(self.default_verdict.clone()),
        }
    }

    async fn assess_credibility(&self, candidate: &RawCandidate) -> IngestResult<bool> {
        self.credibility_calls.fetch_add(1, Ordering::SeqCst);
        match self.credibility.get(&candidate.title) {
            Some(Ok(credible)) => Ok(*credible),
            Some(Err(message)) => Err(IngestError::classification_unavailable(message.clone())),
            None => Ok(true),
        }
    }
}

// ---- Summarizer ----

#[derive(Clone)]
pub struct MockSummarizer {
    reply: Result<String, String>,
    calls: Arc<AtomicUsize>,
}

impl MockSummarizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            reply: Ok(text.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, _incidents: &[Incident]) -> IngestResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .map_err(IngestError::classification_unavailable)
    }
}

// ---- Mailer ----

/// Records every message instead of sending it.
#[derive(Clone, Default)]
pub struct MockMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `address` fail.
    pub fn failing_for(self, address: impl Into<String>) -> Self {
        lock(&self.failing).push(address.into());
        self
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &OutgoingEmail) -> IngestResult<()> {
        let fails = lock(&self.failing)
            .iter()
            .any(|addr| addr.eq_ignore_ascii_case(&email.to));
        if fails {
            return Err(IngestError::delivery(&email.to, "mailbox unavailable"));
        }
        lock(&self.sent).push(email.clone());
        Ok(())
    }
}
