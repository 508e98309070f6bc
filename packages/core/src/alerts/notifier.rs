//! Subscriber notification.
//!
//! Only high-priority incidents go out: severity `high` or `critical` and a
//! relevance score strictly above the configured threshold. Each
//! (incident, subscriber) pair is attempted at most once; every attempt,
//! successful or not, is written to the delivery log.

use std::sync::Arc;

use chrono::Utc;

use crate::alerts::email::{Mailer, OutgoingEmail};
use crate::ingest::config::HIGH_PRIORITY_THRESHOLD;
use crate::ingest::error::IngestResult;
use crate::ingest::types::{DeliveryRecord, DeliveryStatus, Incident, Severity};
use crate::repository::IncidentRepository;

/// Outcome of [`Notifier::notify`] for one incident.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Subscribers whose filters matched.
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
    /// Matched, but a delivery for the pair already existed.
    pub skipped: usize,
}

pub struct Notifier {
    repository: Arc<IncidentRepository>,
    mailer: Arc<dyn Mailer>,
    high_priority_threshold: f64,
}

impl Notifier {
    pub fn new(repository: Arc<IncidentRepository>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            repository,
            mailer,
            high_priority_threshold: HIGH_PRIORITY_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.high_priority_threshold = threshold;
        self
    }

    pub fn should_notify(&self, incident: &Incident) -> bool {
        matches!(incident.severity, Severity::High | Severity::Critical)
            && incident.relevance_score > self.high_priority_threshold
    }

    /// Deliver `incident` to every matching subscriber.
    ///
    /// Transport and delivery-log failures count against one subscriber and
    /// do not stop delivery to the rest. Only a failed subscriber lookup is
    /// returned as an error.
    pub async fn notify(&self, incident: &Incident) -> IngestResult<NotifyReport> {
        let mut report = NotifyReport::default();
        if !self.should_notify(incident) {
            return Ok(report);
        }

        let subscribers = self.repository.list_active_subscribers().await?;

        for subscriber in subscribers.iter().filter(|s| s.wants(incident)) {
            report.eligible += 1;

            match self
                .repository
                .delivery_exists(incident.id, subscriber.id)
                .await
            {
                Ok(true) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(
                        "Delivery lookup for incident {} and subscriber {} failed: {}",
                        incident.id,
                        subscriber.id,
                        err
                    );
                    report.failed += 1;
                    continue;
                }
            }

            let email = render_email(incident, &subscriber.email, subscriber.name.as_deref());
            let (status, error_message) = match self.mailer.send(&email).await {
                Ok(()) => (DeliveryStatus::Sent, None),
                Err(err) => {
                    tracing::warn!(
                        "Delivery of incident {} to subscriber {} failed: {}",
                        incident.id,
                        subscriber.id,
                        err
                    );
                    (DeliveryStatus::Failed, Some(err.to_string()))
                }
            };

            let record = DeliveryRecord {
                id: None,
                incident_id: incident.id,
                subscriber_id: subscriber.id,
                channel: "email".to_string(),
                status,
                error_message,
                attempted_at: Utc::now(),
            };

            match self.repository.record_delivery(&record).await {
                Ok(true) => {}
                Ok(false) => {
                    // Another writer logged this pair between our check and insert.
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    tracing::error!(
                        "Could not log delivery of incident {} to subscriber {}: {}",
                        incident.id,
                        subscriber.id,
                        err
                    );
                    report.failed += 1;
                    continue;
                }
            }

            match status {
                DeliveryStatus::Sent => report.sent += 1,
                DeliveryStatus::Failed => report.failed += 1,
            }
        }

        if report.eligible > 0 {
            tracing::info!(
                "Incident {} notified: {} sent, {} failed, {} already delivered",
                incident.id,
                report.sent,
                report.failed,
                report.skipped
            );
        }

        Ok(report)
    }
}

fn render_email(incident: &Incident, to: &str, name: Option<&str>) -> OutgoingEmail {
    let greeting = match name {
        Some(name) if !name.trim().is_empty() => format!("Hello {},", name.trim()),
        _ => "Hello,".to_string(),
    };

    let mut body = format!(
        "{}\n\nA {} severity {} incident was reported in {}.\n\n{}\n\n{}\n",
        greeting,
        incident.severity,
        incident.category,
        incident.location,
        incident.title,
        incident
            .ai_summary
            .as_deref()
            .unwrap_or(&incident.description),
    );
    if let Some(url) = &incident.url {
        body.push_str(&format!("\nMore information: {}\n", url));
    }
    body.push_str(&format!(
        "\nReported at {} UTC.\n\nCityGuard",
        incident.created_at.format("%Y-%m-%d %H:%M")
    ));

    OutgoingEmail {
        to: to.to_string(),
        subject: format!(
            "[CityGuard] {} alert: {}",
            incident.severity.as_str().to_uppercase(),
            incident.title
        ),
        body,
    }
}
