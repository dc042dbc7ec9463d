//! Audit events emitted once per completed import attempt.
//!
//! The pipeline only sees [`EventRecorder`]; where events end up is an
//! adapter concern. `PgEventRecorder` writes to the `lead_activity_log`
//! table, `LogEventRecorder` to the process log.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

use super::sanitize::sanitize_like_pattern;
use super::types::Actor;

pub const UI_EVENT_SOURCE: &str = "ui:bulk-import";
pub const CLI_EVENT_SOURCE: &str = "cli:bulk-import";
pub const EVENT_CATEGORY: &str = "SYSTEM";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode event metadata: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEventKind {
    BulkImport,
    BulkImportFailed,
}

impl ImportEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportEventKind::BulkImport => "BULK_IMPORT",
            ImportEventKind::BulkImportFailed => "BULK_IMPORT_FAILED",
        }
    }
}

/// Counters describing one import attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub source_name: String,
    pub total_leads: usize,
    pub valid_leads: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub duplicate_count: usize,
    pub duration: Duration,
    /// Absent when nothing was dispatched.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportEvent {
    pub id: Uuid,
    pub kind: ImportEventKind,
    pub category: &'static str,
    pub description: String,
    pub metadata: Map<String, Value>,
    pub source: &'static str,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl ImportEvent {
    pub fn succeeded(stats: &ImportStats, source: &'static str, actor: &Actor) -> Self {
        let description = format!(
            "Bulk imported {} lead(s) from '{}'",
            stats.success_count, stats.source_name
        );
        Self::build(ImportEventKind::BulkImport, description, stats, None, source, actor)
    }

    pub fn failed(
        stats: &ImportStats,
        failure_kind: &str,
        source: &'static str,
        actor: &Actor,
    ) -> Self {
        let description = format!(
            "Bulk import from '{}' failed: {}",
            stats.source_name, failure_kind
        );
        Self::build(
            ImportEventKind::BulkImportFailed,
            description,
            stats,
            Some(failure_kind),
            source,
            actor,
        )
    }

    fn build(
        kind: ImportEventKind,
        description: String,
        stats: &ImportStats,
        failure_kind: Option<&str>,
        source: &'static str,
        actor: &Actor,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("source_name".into(), json!(stats.source_name));
        metadata.insert("total_leads".into(), json!(stats.total_leads));
        metadata.insert("valid_leads".into(), json!(stats.valid_leads));
        metadata.insert("success_count".into(), json!(stats.success_count));
        metadata.insert("error_count".into(), json!(stats.error_count));
        metadata.insert("duplicate_count".into(), json!(stats.duplicate_count));
        metadata.insert(
            "import_duration_ms".into(),
            json!(u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX)),
        );
        metadata.insert("imported_by_user_id".into(), json!(actor.id));
        metadata.insert("imported_by_email".into(), json!(actor.email));
        metadata.insert("idempotency_key".into(), json!(stats.idempotency_key));
        if let Some(failure_kind) = failure_kind {
            metadata.insert("failure_kind".into(), json!(failure_kind));
        }

        Self {
            id: Uuid::new_v4(),
            kind,
            category: EVENT_CATEGORY,
            description,
            metadata,
            source,
            actor: actor.clone(),
            occurred_at: Utc::now(),
        }
    }
}

#[rocket::async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: &ImportEvent) -> Result<(), EventError>;
}

/// Writes events to the process log only.
#[derive(Debug, Clone, Default)]
pub struct LogEventRecorder;

#[rocket::async_trait]
impl EventRecorder for LogEventRecorder {
    async fn record(&self, event: &ImportEvent) -> Result<(), EventError> {
        let metadata = serde_json::to_string(&event.metadata)?;
        log::info!(
            "[{}] {} {} by {}: {} {}",
            event.source,
            event.category,
            event.kind.as_str(),
            event.actor.id,
            event.description,
            metadata
        );
        Ok(())
    }
}

/// Persists events to `lead_activity_log`.
#[derive(Clone)]
pub struct PgEventRecorder {
    pool: PgPool,
}

impl PgEventRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl EventRecorder for PgEventRecorder {
    async fn record(&self, event: &ImportEvent) -> Result<(), EventError> {
        let metadata = serde_json::to_string(&event.metadata)?;

        sqlx::query(
            r#"INSERT INTO lead_activity_log
                   (id, event_type, category, description, metadata, source, actor_id, actor_email, created_at)
               VALUES ($1, $2, $3, $4, $5::jsonb, $6, $7, $8, $9)"#,
        )
        .bind(event.id)
        .bind(event.kind.as_str())
        .bind(event.category)
        .bind(&event.description)
        .bind(metadata)
        .bind(event.source)
        .bind(&event.actor.id)
        .bind(event.actor.email.as_deref())
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// One row of the import history.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryEntry {
    #[schemars(with = "String")]
    pub id: Uuid,
    pub event_type: String,
    pub description: String,
    pub metadata: Value,
    pub source: String,
    pub actor_id: String,
    pub actor_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

type HistoryRow = (
    Uuid,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
);

pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Most recent import events, newest first. `filter` matches the
/// description or the source name case-insensitively.
pub async fn recent_imports(
    pool: &PgPool,
    filter: Option<&str>,
    limit: i64,
) -> Result<Vec<ImportHistoryEntry>, EventError> {
    let pattern = filter
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("%{}%", sanitize_like_pattern(value)));

    let rows: Vec<HistoryRow> = sqlx::query_as(
        r#"SELECT id, event_type, description, metadata::text, source, actor_id, actor_email, created_at
           FROM lead_activity_log
           WHERE event_type IN ('BULK_IMPORT', 'BULK_IMPORT_FAILED')
             AND ($1::text IS NULL
                  OR description ILIKE $1 ESCAPE '\'
                  OR metadata->>'source_name' ILIKE $1 ESCAPE '\')
           ORDER BY created_at DESC
           LIMIT $2"#,
    )
    .bind(pattern)
    .bind(limit.clamp(1, MAX_HISTORY_LIMIT))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(
            |(id, event_type, description, metadata, source, actor_id, actor_email, created_at)|
             -> Result<ImportHistoryEntry, EventError> {
                Ok(ImportHistoryEntry {
                    id,
                    event_type,
                    description,
                    metadata: serde_json::from_str(&metadata)?,
                    source,
                    actor_id,
                    actor_email,
                    created_at,
                })
            },
        )
        .collect()
}
