//! Prometheus metrics registry for CityGuard.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the ingestion pipeline and HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

use crate::ingest::pipeline::CycleReport;

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Ingestion cycles run (one per location per tick).
    pub cycles_total: Counter,
    /// Source fetch failures, labelled by provider.
    pub source_errors_total: CounterVec,
    /// Candidates the classifier could not handle.
    pub classification_errors_total: Counter,
    /// Store reads or writes that failed during a cycle.
    pub persistence_errors_total: Counter,
    /// New incidents written.
    pub incidents_stored_total: Counter,
    /// Candidates matching an incident inside the dedup window.
    pub duplicates_skipped_total: Counter,
    /// Candidates dropped as not credible or not relevant.
    pub candidates_discarded_total: Counter,
    /// Delivery attempts, labelled by status (`sent` / `failed`).
    pub deliveries_total: CounterVec,
    /// Candidates fetched in the most recent cycle.
    pub last_cycle_candidates: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total = Counter::with_opts(Opts::new(
            "cityguard_cycles_total",
            "Ingestion cycles run",
        ))?;

        let source_errors_total = CounterVec::new(
            Opts::new("cityguard_source_errors_total", "Source fetch failures by provider"),
            &["provider"],
        )?;

        let classification_errors_total = Counter::with_opts(Opts::new(
            "cityguard_classification_errors_total",
            "Candidates that could not be classified",
        ))?;

        let persistence_errors_total = Counter::with_opts(Opts::new(
            "cityguard_persistence_errors_total",
            "Store failures during ingestion",
        ))?;

        let incidents_stored_total = Counter::with_opts(Opts::new(
            "cityguard_incidents_stored_total",
            "New incidents persisted",
        ))?;

        let duplicates_skipped_total = Counter::with_opts(Opts::new(
            "cityguard_duplicates_skipped_total",
            "Candidates matching a recent incident",
        ))?;

        let candidates_discarded_total = Counter::with_opts(Opts::new(
            "cityguard_candidates_discarded_total",
            "Candidates discarded as not credible or not relevant",
        ))?;

        let deliveries_total = CounterVec::new(
            Opts::new("cityguard_deliveries_total", "Notification attempts by status"),
            &["status"],
        )?;

        let last_cycle_candidates = Gauge::with_opts(Opts::new(
            "cityguard_last_cycle_candidates",
            "Candidates fetched in the most recent cycle",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "cityguard_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "cityguard_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(source_errors_total.clone()))?;
        registry.register(Box::new(classification_errors_total.clone()))?;
        registry.register(Box::new(persistence_errors_total.clone()))?;
        registry.register(Box::new(incidents_stored_total.clone()))?;
        registry.register(Box::new(duplicates_skipped_total.clone()))?;
        registry.register(Box::new(candidates_discarded_total.clone()))?;
        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(last_cycle_candidates.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            cycles_total,
            source_errors_total,
            classification_errors_total,
            persistence_errors_total,
            incidents_stored_total,
            duplicates_skipped_total,
            candidates_discarded_total,
            deliveries_total,
            last_cycle_candidates,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Fold one cycle's counters into the registry. Skipped cycles only
    /// count towards `cycles_total`.
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles_total.inc();
        if report.skipped {
            return;
        }

        for provider in &report.failed_sources {
            self.source_errors_total
                .with_label_values(&[provider.as_str()])
                .inc();
        }
        self.classification_errors_total
            .inc_by(report.classification_failures as f64);
        self.persistence_errors_total
            .inc_by(report.persistence_failures as f64);
        self.incidents_stored_total.inc_by(report.stored as f64);
        self.duplicates_skipped_total.inc_by(report.duplicates as f64);
        self.candidates_discarded_total.inc_by(report.discarded as f64);
        self.deliveries_total
            .with_label_values(&["sent"])
            .inc_by(report.notified as f64);
        self.deliveries_total
            .with_label_values(&["failed"])
            .inc_by(report.delivery_failures as f64);
        self.last_cycle_candidates.set(report.fetched as f64);
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
