//! Database repository for incidents, subscribers and delivery records.
//!
//! All SQLite read/write logic lives here. The ingestion pipeline calls
//! [`IncidentRepository::insert_incident`] for every classified candidate;
//! the duplicate check and the insert run in one transaction so two
//! cycles racing on the same event can never both write a row.
//!
//! The notifier reads [`IncidentRepository::list_active_subscribers`] and
//! writes one row per attempt through [`IncidentRepository::record_delivery`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{format_timestamp, parse_timestamp};
use crate::ingest::config::{fold_key, DedupPolicy};
use crate::ingest::types::{
    DeliveryRecord, DeliveryStatus, Incident, NewIncident, Severity, Source, Subscriber,
};

const INCIDENT_COLUMNS: &str = "id, title, description, ai_summary, severity, category, source, \
     location, relevance_score, is_verified, url, created_at, updated_at";

const SUBSCRIBER_COLUMNS: &str =
    "id, email, name, location, severity_threshold, categories, active, created_at, updated_at";

/// Result of [`IncidentRepository::insert_incident`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Incident),
    /// An equivalent incident already exists inside the dedup window.
    Duplicate(i64),
}

/// Filters for [`IncidentRepository::query_incidents`].
#[derive(Debug, Clone)]
pub struct IncidentFilter {
    pub hours: i64,
    pub min_relevance: f64,
    pub source: Option<Source>,
    pub severity: Option<Severity>,
    pub limit: i64,
}

impl Default for IncidentFilter {
    fn default() -> Self {
        Self {
            hours: 24,
            min_relevance: 0.3,
            source: None,
            severity: None,
            limit: 20,
        }
    }
}

/// Dashboard counters over the last 24 hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentStats {
    pub total_incidents_24h: i64,
    pub critical_incidents_24h: i64,
    pub high_incidents_24h: i64,
    pub weather_incidents_24h: i64,
    pub news_incidents_24h: i64,
    pub active_subscribers: i64,
    pub last_updated: DateTime<Utc>,
}

/// Fields accepted when registering a subscriber.
#[derive(Debug, Clone, Default)]
pub struct NewSubscriber {
    pub email: String,
    pub name: Option<String>,
    pub location: Option<String>,
    /// Defaults to `medium` when unset.
    pub severity_threshold: Option<Severity>,
    pub categories: Vec<String>,
}

/// Repository for reading and writing CityGuard data to SQLite.
#[derive(Clone)]
pub struct IncidentRepository {
    pool: SqlitePool,
    dedup: DedupPolicy,
}

impl IncidentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_dedup(pool, DedupPolicy::default())
    }

    pub fn with_dedup(pool: SqlitePool, dedup: DedupPolicy) -> Self {
        Self { pool, dedup }
    }

    pub fn dedup_policy(&self) -> &DedupPolicy {
        &self.dedup
    }

    /// Cheap round trip used by the health check.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Case-insensitive matching compares the `*_key` columns, which hold
    /// [`fold_key`] of title and location written at insert time.
    fn match_clause(&self) -> &'static str {
        if self.dedup.case_insensitive {
            "source = ? AND title_key = ? AND location_key = ? AND created_at >= ?"
        } else {
            "source = ? AND title = ? AND location = ? AND created_at >= ?"
        }
    }

    /// Values bound to the title and location slots of [`Self::match_clause`].
    fn match_values(&self, title: &str, location: &str) -> (String, String) {
        if self.dedup.case_insensitive {
            (fold_key(title), fold_key(location))
        } else {
            (title.to_string(), location.to_string())
        }
    }

    // ---- Incidents ----

    /// `true` when an incident with the same title, location and source was
    /// created within the dedup window before `now`.
    pub async fn exists_recent(
        &self,
        title: &str,
        location: &str,
        source: Source,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let cutoff = cutoff_before(now, Some(self.dedup.window));
        let (title, location) = self.match_values(title, location);
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM incidents WHERE {}) AS found",
            self.match_clause()
        );

        let row = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(&title)
            .bind(&location)
            .bind(&cutoff)
            .fetch_one(&self.pool)
            .await?;

        let found: i64 = row.try_get("found")?;
        Ok(found != 0)
    }

    /// Refresh `updated_at` on the most recent incident matching the
    /// candidate inside the dedup window. Returns its id, or `None` when
    /// there is no such incident.
    pub async fn touch_duplicate(
        &self,
        title: &str,
        location: &str,
        source: Source,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, sqlx::Error> {
        let cutoff = cutoff_before(now, Some(self.dedup.window));
        let (title, location) = self.match_values(title, location);
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT id FROM incidents WHERE {} ORDER BY created_at DESC LIMIT 1",
            self.match_clause()
        );
        let existing = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(&title)
            .bind(&location)
            .bind(&cutoff)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = existing else {
            return Ok(None);
        };
        let id: i64 = row.try_get("id")?;

        sqlx::query("UPDATE incidents SET updated_at = ? WHERE id = ?")
            .bind(format_timestamp(now))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(id))
    }

    /// Insert a classified incident unless it duplicates a recent one.
    ///
    /// On a duplicate the existing row only has its `updated_at` refreshed.
    pub async fn insert_incident(&self, incident: &NewIncident) -> Result<InsertOutcome, sqlx::Error> {
        let observed = format_timestamp(incident.observed_at);
        let cutoff = cutoff_before(incident.observed_at, Some(self.dedup.window));
        let (title_match, location_match) = self.match_values(&incident.title, &incident.location);

        let mut tx = self.pool.begin().await?;

        let existing_sql = format!(
            "SELECT id FROM incidents WHERE {} ORDER BY created_at DESC LIMIT 1",
            self.match_clause()
        );
        let existing = sqlx::query(&existing_sql)
            .bind(incident.source.as_str())
            .bind(&title_match)
            .bind(&location_match)
            .bind(&cutoff)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = existing {
            let id: i64 = row.try_get("id")?;
            sqlx::query("UPDATE incidents SET updated_at = ? WHERE id = ?")
                .bind(&observed)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(InsertOutcome::Duplicate(id));
        }

        let result = sqlx::query(
            "INSERT INTO incidents
             (title, title_key, description, ai_summary, severity, category, source, location,
              location_key, relevance_score, is_verified, url, raw_data, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&incident.title)
        .bind(fold_key(&incident.title))
        .bind(&incident.description)
        .bind(&incident.ai_summary)
        .bind(incident.severity.as_str())
        .bind(&incident.category)
        .bind(incident.source.as_str())
        .bind(&incident.location)
        .bind(fold_key(&incident.location))
        .bind(incident.relevance_score)
        .bind(incident.is_verified)
        .bind(&incident.url)
        .bind(&incident.raw_data)
        .bind(&observed)
        .bind(&observed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(InsertOutcome::Inserted(Incident {
            id: result.last_insert_rowid(),
            title: incident.title.clone(),
            description: incident.description.clone(),
            source: incident.source,
            location: incident.location.clone(),
            severity: incident.severity,
            category: incident.category.clone(),
            url: incident.url.clone(),
            ai_summary: incident.ai_summary.clone(),
            relevance_score: incident.relevance_score,
            is_verified: incident.is_verified,
            created_at: incident.observed_at,
            updated_at: incident.observed_at,
        }))
    }

    pub async fn get_incident(&self, id: i64) -> Result<Option<Incident>, sqlx::Error> {
        let sql = format!("SELECT {} FROM incidents WHERE id = ?", INCIDENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().and_then(incident_from_row))
    }

    /// Incidents newer than `filter.hours` before `now`, most relevant
    /// first, ties broken by recency.
    pub async fn query_incidents(
        &self,
        filter: &IncidentFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Incident>, sqlx::Error> {
        let cutoff = cutoff_before(now, Duration::try_hours(filter.hours.max(0)));
        let limit = filter.limit.clamp(1, 100);

        // WHERE 1=1 pattern; optional binds are appended in the same order.
        let mut conditions = vec!["created_at >= ?", "relevance_score >= ?"];
        if filter.source.is_some() {
            conditions.push("source = ?");
        }
        if filter.severity.is_some() {
            conditions.push("severity = ?");
        }

        let sql = format!(
            "SELECT {} FROM incidents
             WHERE {}
             ORDER BY relevance_score DESC, created_at DESC
             LIMIT ?",
            INCIDENT_COLUMNS,
            conditions.join(" AND ")
        );

        let mut q = sqlx::query(&sql).bind(&cutoff).bind(filter.min_relevance);
        if let Some(source) = filter.source {
            q = q.bind(source.as_str());
        }
        if let Some(severity) = filter.severity {
            q = q.bind(severity.as_str());
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        Ok(rows.iter().filter_map(incident_from_row).collect())
    }

    /// The `limit` most recent incidents of one severity tier.
    pub async fn recent_by_severity(
        &self,
        severity: Severity,
        limit: i64,
    ) -> Result<Vec<Incident>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM incidents WHERE severity = ? ORDER BY created_at DESC LIMIT ?",
            INCIDENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(severity.as_str())
            .bind(limit.clamp(1, 100))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(incident_from_row).collect())
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<IncidentStats, sqlx::Error> {
        let cutoff = cutoff_before(now, Duration::try_hours(24));

        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN severity = 'critical' THEN 1 ELSE 0 END), 0) AS critical,
                COALESCE(SUM(CASE WHEN severity = 'high' THEN 1 ELSE 0 END), 0) AS high,
                COALESCE(SUM(CASE WHEN source = 'weather' THEN 1 ELSE 0 END), 0) AS weather,
                COALESCE(SUM(CASE WHEN source = 'news' THEN 1 ELSE 0 END), 0) AS news
             FROM incidents
             WHERE created_at >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let active: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM subscribers WHERE active = 1")
            .fetch_one(&self.pool)
            .await?
            .try_get("cnt")?;

        Ok(IncidentStats {
            total_incidents_24h: row.try_get("total")?,
            critical_incidents_24h: row.try_get("critical")?,
            high_incidents_24h: row.try_get("high")?,
            weather_incidents_24h: row.try_get("weather")?,
            news_incidents_24h: row.try_get("news")?,
            active_subscribers: active,
            last_updated: now,
        })
    }

    // ---- Subscribers ----

    /// Register a subscriber. Returns the new row id.
    pub async fn insert_subscriber(&self, subscriber: &NewSubscriber) -> Result<i64, sqlx::Error> {
        let now = format_timestamp(Utc::now());
        let threshold = subscriber.severity_threshold.unwrap_or(Severity::Medium);

        let result = sqlx::query(
            "INSERT INTO subscribers
             (email, name, location, severity_threshold, categories, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(subscriber.email.trim())
        .bind(&subscriber.name)
        .bind(&subscriber.location)
        .bind(threshold.as_str())
        .bind(join_categories(&subscriber.categories))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// List all subscribers (both active and inactive).
    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>, sqlx::Error> {
        let sql = format!("SELECT {} FROM subscribers ORDER BY id ASC", SUBSCRIBER_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().filter_map(subscriber_from_row).collect())
    }

    pub async fn list_active_subscribers(&self) -> Result<Vec<Subscriber>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM subscribers WHERE active = 1 ORDER BY id ASC",
            SUBSCRIBER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().filter_map(subscriber_from_row).collect())
    }

    pub async fn get_subscriber(&self, id: i64) -> Result<Option<Subscriber>, sqlx::Error> {
        let sql = format!("SELECT {} FROM subscribers WHERE id = ?", SUBSCRIBER_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().and_then(subscriber_from_row))
    }

    /// Overwrite the preference fields of a subscriber.
    /// Returns `true` if a row was updated, `false` if id not found.
    pub async fn update_subscriber(&self, subscriber: &Subscriber) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscribers
             SET name = ?, location = ?, severity_threshold = ?, categories = ?, active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&subscriber.name)
        .bind(&subscriber.location)
        .bind(subscriber.severity_threshold.as_str())
        .bind(join_categories(&subscriber.categories))
        .bind(subscriber.active)
        .bind(format_timestamp(Utc::now()))
        .bind(subscriber.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a subscriber by clearing the active flag.
    /// Returns `true` if a row was found and updated.
    pub async fn deactivate_subscriber(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE subscribers SET active = 0, updated_at = ? WHERE id = ?")
            .bind(format_timestamp(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- Delivery log ----

    pub async fn delivery_exists(
        &self,
        incident_id: i64,
        subscriber_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM delivery_records WHERE incident_id = ? AND subscriber_id = ?
             ) AS found",
        )
        .bind(incident_id)
        .bind(subscriber_id)
        .fetch_one(&self.pool)
        .await?;

        let found: i64 = row.try_get("found")?;
        Ok(found != 0)
    }

    /// Log a delivery attempt. Returns `false` when a record for the same
    /// (incident, subscriber) pair already exists and nothing was written.
    pub async fn record_delivery(&self, record: &DeliveryRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO delivery_records
             (incident_id, subscriber_id, channel, status, error_message, attempted_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.incident_id)
        .bind(record.subscriber_id)
        .bind(&record.channel)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(format_timestamp(record.attempted_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delivery history, newest first. `limit` is clamped to 100.
    pub async fn query_deliveries(
        &self,
        limit: i64,
        status_filter: Option<DeliveryStatus>,
        incident_filter: Option<i64>,
    ) -> Result<Vec<DeliveryRecord>, sqlx::Error> {
        let limit = limit.clamp(1, 100);
        let where_clause = delivery_conditions(status_filter, incident_filter);

        let sql = format!(
            "SELECT id, incident_id, subscriber_id, channel, status, error_message, attempted_at
             FROM delivery_records
             WHERE {}
             ORDER BY attempted_at DESC, id DESC
             LIMIT ?",
            where_clause
        );

        let mut q = sqlx::query(&sql);
        if let Some(status) = status_filter {
            q = q.bind(status.as_str());
        }
        if let Some(incident_id) = incident_filter {
            q = q.bind(incident_id);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        Ok(rows.iter().filter_map(delivery_from_row).collect())
    }

    /// Count delivery records matching optional filters (for pagination totals).
    pub async fn count_deliveries(
        &self,
        status_filter: Option<DeliveryStatus>,
        incident_filter: Option<i64>,
    ) -> Result<i64, sqlx::Error> {
        let sql = format!(
            "SELECT COUNT(*) AS cnt FROM delivery_records WHERE {}",
            delivery_conditions(status_filter, incident_filter)
        );

        let mut q = sqlx::query(&sql);
        if let Some(status) = status_filter {
            q = q.bind(status.as_str());
        }
        if let Some(incident_id) = incident_filter {
            q = q.bind(incident_id);
        }

        let row = q.fetch_one(&self.pool).await?;
        row.try_get("cnt")
    }
}

fn delivery_conditions(status: Option<DeliveryStatus>, incident: Option<i64>) -> String {
    let mut conditions = vec!["1=1"];
    if status.is_some() {
        conditions.push("status = ?");
    }
    if incident.is_some() {
        conditions.push("incident_id = ?");
    }
    conditions.join(" AND ")
}

/// Lower bound for a `created_at >= ?` filter reaching `span` back from
/// `now`. Spans that cannot be represented reach back to the earliest
/// timestamp, so the filter matches everything.
fn cutoff_before(now: DateTime<Utc>, span: Option<Duration>) -> String {
    let cutoff = span
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    format_timestamp(cutoff)
}

fn join_categories(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_categories(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn incident_from_row(row: &SqliteRow) -> Option<Incident> {
    let severity: String = row.try_get("severity").ok()?;
    let source: String = row.try_get("source").ok()?;
    let created_at: String = row.try_get("created_at").ok()?;
    let updated_at: String = row.try_get("updated_at").ok()?;

    Some(Incident {
        id: row.try_get("id").ok()?,
        title: row.try_get("title").ok()?,
        description: row.try_get("description").ok()?,
        source: source.parse().ok()?,
        location: row.try_get("location").ok()?,
        severity: severity.parse().ok()?,
        category: row.try_get("category").ok()?,
        url: row.try_get("url").ok()?,
        ai_summary: row.try_get("ai_summary").ok()?,
        relevance_score: row.try_get("relevance_score").ok()?,
        is_verified: row.try_get("is_verified").ok()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn subscriber_from_row(row: &SqliteRow) -> Option<Subscriber> {
    let threshold: String = row.try_get("severity_threshold").ok()?;
    let categories: String = row.try_get("categories").ok()?;
    let created_at: String = row.try_get("created_at").ok()?;
    let updated_at: String = row.try_get("updated_at").ok()?;

    Some(Subscriber {
        id: row.try_get("id").ok()?,
        email: row.try_get("email").ok()?,
        name: row.try_get("name").ok()?,
        location: row.try_get("location").ok()?,
        severity_threshold: threshold.parse().ok()?,
        categories: split_categories(&categories),
        active: row.try_get("active").ok()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn delivery_from_row(row: &SqliteRow) -> Option<DeliveryRecord> {
    let status: String = row.try_get("status").ok()?;
    let attempted_at: String = row.try_get("attempted_at").ok()?;

    Some(DeliveryRecord {
        id: Some(row.try_get("id").ok()?),
        incident_id: row.try_get("incident_id").ok()?,
        subscriber_id: row.try_get("subscriber_id").ok()?,
        channel: row.try_get("channel").ok()?,
        status: status.parse().ok()?,
        error_message: row.try_get("error_message").ok()?,
        attempted_at: parse_timestamp(&attempted_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::create_pool;

    async fn make_repo() -> IncidentRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        IncidentRepository::new(pool)
    }

    fn make_incident(title: &str, relevance: f64, observed_at: DateTime<Utc>) -> NewIncident {
        NewIncident {
            title: title.to_string(),
            description: "Reported by city officials".to_string(),
            source: Source::News,
            location: "New York".to_string(),
            severity: Severity::High,
            category: "traffic".to_string(),
            url: Some("https://news.example.com/a".to_string()),
            ai_summary: Some("Summary".to_string()),
            relevance_score: relevance,
            is_verified: true,
            raw_data: None,
            observed_at,
        }
    }

    async fn inserted(repo: &IncidentRepository, incident: &NewIncident) -> Incident {
        match repo.insert_incident(incident).await.unwrap() {
            InsertOutcome::Inserted(i) => i,
            InsertOutcome::Duplicate(id) => panic!("unexpected duplicate of {}", id),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_fields() {
        let repo = make_repo().await;
        let stored = inserted(&repo, &make_incident("Bridge closed", 0.8, Utc::now())).await;

        let fetched = repo.get_incident(stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Bridge closed");
        assert_eq!(fetched.severity, Severity::High);
        assert_eq!(fetched.source, Source::News);
        assert!((fetched.relevance_score - 0.8).abs() < f64::EPSILON);
        assert!(fetched.is_verified);
    }

    #[tokio::test]
    async fn get_missing_incident_returns_none() {
        let repo = make_repo().await;
        assert!(repo.get_incident(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_insert_in_window_is_duplicate() {
        let repo = make_repo().await;
        let now = Utc::now();
        let first = inserted(&repo, &make_incident("Bridge closed", 0.8, now)).await;

        let again = make_incident("BRIDGE CLOSED", 0.9, now + Duration::minutes(10));
        match repo.insert_incident(&again).await.unwrap() {
            InsertOutcome::Duplicate(id) => assert_eq!(id, first.id),
            InsertOutcome::Inserted(_) => panic!("expected duplicate"),
        }

        let fetched = repo.get_incident(first.id).await.unwrap().unwrap();
        assert!(fetched.updated_at > fetched.created_at);
        assert!((fetched.relevance_score - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn non_ascii_case_variants_are_duplicates() {
        let repo = make_repo().await;
        let now = Utc::now();
        let mut first = make_incident("ÉVACUATION à Québec", 0.8, now);
        first.location = "QUÉBEC".to_string();
        let stored = inserted(&repo, &first).await;

        let mut again = make_incident("évacuation à québec", 0.8, now);
        again.location = "québec".to_string();
        match repo.insert_incident(&again).await.unwrap() {
            InsertOutcome::Duplicate(id) => assert_eq!(id, stored.id),
            InsertOutcome::Inserted(_) => panic!("expected duplicate"),
        }

        let touched = repo
            .touch_duplicate("Évacuation À Québec", "Québec", Source::News, now)
            .await
            .unwrap();
        assert_eq!(touched, Some(stored.id));
    }

    #[tokio::test]
    async fn case_sensitive_policy_keeps_non_ascii_variants_apart() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = IncidentRepository::with_dedup(
            pool,
            DedupPolicy {
                window: Duration::hours(24),
                case_insensitive: false,
            },
        );
        let now = Utc::now();
        inserted(&repo, &make_incident("ÉVACUATION", 0.8, now)).await;
        inserted(&repo, &make_incident("évacuation", 0.8, now)).await;
    }

    #[tokio::test]
    async fn unrepresentable_hours_match_everything() {
        let repo = make_repo().await;
        let now = Utc::now();
        inserted(&repo, &make_incident("old", 0.8, now - Duration::hours(48))).await;

        for hours in [3_000_000_000, i64::MAX] {
            let filter = IncidentFilter {
                hours,
                ..IncidentFilter::default()
            };
            let results = repo.query_incidents(&filter, now).await.unwrap();
            assert_eq!(results.len(), 1);
        }
    }

    #[tokio::test]
    async fn insert_outside_window_is_new_row() {
        let repo = make_repo().await;
        let now = Utc::now();
        inserted(&repo, &make_incident("Bridge closed", 0.8, now - Duration::hours(30))).await;

        let outcome = repo
            .insert_incident(&make_incident("Bridge closed", 0.8, now))
            .await
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn case_sensitive_policy_treats_case_variants_as_distinct() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = IncidentRepository::with_dedup(
            pool,
            DedupPolicy {
                window: Duration::hours(24),
                case_insensitive: false,
            },
        );
        let now = Utc::now();
        inserted(&repo, &make_incident("Bridge closed", 0.8, now)).await;
        let outcome = repo
            .insert_incident(&make_incident("bridge closed", 0.8, now))
            .await
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn exists_recent_respects_source_and_window() {
        let repo = make_repo().await;
        let now = Utc::now();
        inserted(&repo, &make_incident("Bridge closed", 0.8, now)).await;

        assert!(repo
            .exists_recent("bridge closed", "new york", Source::News, now)
            .await
            .unwrap());
        assert!(!repo
            .exists_recent("Bridge closed", "New York", Source::Weather, now)
            .await
            .unwrap());
        assert!(!repo
            .exists_recent("Bridge closed", "New York", Source::News, now + Duration::hours(25))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn touch_duplicate_refreshes_only_updated_at() {
        let repo = make_repo().await;
        let now = Utc::now();
        let stored = inserted(&repo, &make_incident("Bridge closed", 0.8, now)).await;

        let later = now + Duration::minutes(30);
        let touched = repo
            .touch_duplicate("Bridge Closed", "New York", Source::News, later)
            .await
            .unwrap();
        assert_eq!(touched, Some(stored.id));

        let fetched = repo.get_incident(stored.id).await.unwrap().unwrap();
        assert_eq!(
            format_timestamp(fetched.created_at),
            format_timestamp(stored.created_at)
        );
        assert!(fetched.updated_at > fetched.created_at);

        let missing = repo
            .touch_duplicate("Other", "New York", Source::News, later)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn query_orders_by_relevance_then_recency() {
        let repo = make_repo().await;
        let now = Utc::now();
        inserted(&repo, &make_incident("a", 0.6, now - Duration::hours(3))).await;
        inserted(&repo, &make_incident("b", 0.9, now - Duration::hours(2))).await;
        inserted(&repo, &make_incident("c", 0.6, now - Duration::hours(1))).await;

        let results = repo
            .query_incidents(&IncidentFilter::default(), now)
            .await
            .unwrap();
        let titles: Vec<_> = results.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn query_applies_time_and_relevance_bounds() {
        let repo = make_repo().await;
        let now = Utc::now();
        inserted(&repo, &make_incident("fresh", 0.7, now - Duration::hours(1))).await;
        inserted(&repo, &make_incident("weak", 0.4, now - Duration::hours(1))).await;
        inserted(&repo, &make_incident("stale", 0.9, now - Duration::hours(30))).await;

        let filter = IncidentFilter {
            hours: 24,
            min_relevance: 0.5,
            ..Default::default()
        };
        let results = repo.query_incidents(&filter, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "fresh");
    }

    #[tokio::test]
    async fn query_filters_by_source_and_severity() {
        let repo = make_repo().await;
        let now = Utc::now();
        inserted(&repo, &make_incident("news-high", 0.8, now)).await;
        let mut weather = make_incident("weather-critical", 0.8, now);
        weather.source = Source::Weather;
        weather.severity = Severity::Critical;
        inserted(&repo, &weather).await;

        let by_source = IncidentFilter {
            source: Some(Source::Weather),
            ..Default::default()
        };
        let results = repo.query_incidents(&by_source, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "weather-critical");

        let by_severity = IncidentFilter {
            severity: Some(Severity::High),
            ..Default::default()
        };
        let results = repo.query_incidents(&by_severity, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "news-high");
    }

    #[tokio::test]
    async fn stats_count_last_day_only() {
        let repo = make_repo().await;
        let now = Utc::now();
        let mut critical = make_incident("storm", 0.9, now);
        critical.severity = Severity::Critical;
        critical.source = Source::Weather;
        inserted(&repo, &critical).await;
        inserted(&repo, &make_incident("crash", 0.8, now)).await;
        inserted(&repo, &make_incident("old", 0.8, now - Duration::hours(48))).await;
        repo.insert_subscriber(&NewSubscriber {
            email: "a@example.com".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let stats = repo.stats(now).await.unwrap();
        assert_eq!(stats.total_incidents_24h, 2);
        assert_eq!(stats.critical_incidents_24h, 1);
        assert_eq!(stats.high_incidents_24h, 1);
        assert_eq!(stats.weather_incidents_24h, 1);
        assert_eq!(stats.news_incidents_24h, 1);
        assert_eq!(stats.active_subscribers, 1);
    }

    #[tokio::test]
    async fn subscriber_crud_cycle() {
        let repo = make_repo().await;
        let id = repo
            .insert_subscriber(&NewSubscriber {
                email: "resident@example.com".into(),
                name: Some("Resident".into()),
                location: Some("New York".into()),
                severity_threshold: Some(Severity::High),
                categories: vec!["Weather".into(), " ".into(), "crime".into()],
            })
            .await
            .unwrap();

        let mut sub = repo.get_subscriber(id).await.unwrap().unwrap();
        assert_eq!(sub.categories, vec!["weather", "crime"]);
        assert_eq!(sub.severity_threshold, Severity::High);

        sub.severity_threshold = Severity::Critical;
        sub.categories.clear();
        assert!(repo.update_subscriber(&sub).await.unwrap());
        let sub = repo.get_subscriber(id).await.unwrap().unwrap();
        assert_eq!(sub.severity_threshold, Severity::Critical);
        assert!(sub.categories.is_empty());

        assert!(repo.deactivate_subscriber(id).await.unwrap());
        assert!(repo.list_active_subscribers().await.unwrap().is_empty());
        assert_eq!(repo.list_subscribers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let repo = make_repo().await;
        let sub = NewSubscriber {
            email: "dup@example.com".into(),
            ..Default::default()
        };
        repo.insert_subscriber(&sub).await.unwrap();
        assert!(repo.insert_subscriber(&sub).await.is_err());
    }

    #[tokio::test]
    async fn deactivate_missing_subscriber_returns_false() {
        let repo = make_repo().await;
        assert!(!repo.deactivate_subscriber(9999).await.unwrap());
    }
}
