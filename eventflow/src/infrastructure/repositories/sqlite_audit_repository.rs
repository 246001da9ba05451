// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Audit Repository
//!
//! SQLite-backed implementation of the domain's
//! [`AuditRepository`](eventflow_domain::AuditRepository) port. This is the
//! pipeline's durable sink: every validated event, every emitted metric,
//! and the event→metric lineage trace land here.
//!
//! ## Connection tuning
//!
//! The database opens with `journal_mode=WAL`, `synchronous=NORMAL`,
//! `foreign_keys=ON`, and a 5-second busy timeout. The pool is capped at a
//! single connection: the audit store is single-writer per process, and
//! WAL already permits external readers alongside that writer.
//!
//! ## Transactional semantics
//!
//! - Events insert with `INSERT OR IGNORE`; the `event_id` primary key
//!   collapses redeliveries and replays into one row.
//! - A metric and its trace rows commit in one transaction. `INSERT OR
//!   REPLACE` on `metrics_out` gives resends overwrite semantics; the
//!   trace's `ON DELETE CASCADE` lets the replace drop and rebuild the old
//!   lineage atomically.
//! - A trace row referencing an event id that is not yet in `events_in`
//!   violates the foreign key; the transaction rolls back and the error
//!   maps to `LineageViolation` so the consumer nacks with requeue and the
//!   broker redelivers after the event writer catches up.

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use eventflow_domain::events::RegionMetric;
use eventflow_domain::repositories::{AuditRepository, EventRecord};
use eventflow_domain::PipelineError;

/// Contribution type recorded for every window-membership trace row.
const WINDOW_MEMBER: &str = "window_member";

/// Audit schema: events, metrics, and the lineage trace between them.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events_in (
    event_id       TEXT PRIMARY KEY,
    timestamp      TEXT NOT NULL,
    region         TEXT NOT NULL,
    source         TEXT NOT NULL,
    schema_version TEXT,
    correlation_id TEXT,
    payload_json   TEXT NOT NULL,
    run_id         TEXT NOT NULL,
    inserted_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS metrics_out (
    metric_id    TEXT PRIMARY KEY,
    date         TEXT NOT NULL,
    region       TEXT NOT NULL,
    run_id       TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    created_at   TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS trace (
    event_id          TEXT NOT NULL,
    metric_id         TEXT NOT NULL,
    contribution_type TEXT NOT NULL,
    PRIMARY KEY (event_id, metric_id),
    FOREIGN KEY (event_id) REFERENCES events_in(event_id),
    FOREIGN KEY (metric_id) REFERENCES metrics_out(metric_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_events_in_region ON events_in(region);
CREATE INDEX IF NOT EXISTS idx_trace_metric ON trace(metric_id);
"#;

fn map_sqlx_error(error: sqlx::Error) -> PipelineError {
    if let sqlx::Error::Database(ref db_error) = error {
        if db_error.message().contains("FOREIGN KEY") {
            return PipelineError::lineage_violation(db_error.message().to_string());
        }
    }
    PipelineError::database_error(error.to_string())
}

/// Single-writer SQLite sink for the audit service.
#[derive(Debug, Clone)]
pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    /// Opens (creating if missing) the audit database and ensures the
    /// schema exists.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(map_sqlx_error)?;

        info!(path = %db_path.display(), "audit database ready");
        Ok(Self { pool })
    }

    /// Pool handle for integration tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn record_event(&self, event: &EventRecord) -> Result<bool, PipelineError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO events_in \
             (event_id, timestamp, region, source, schema_version, correlation_id, payload_json, run_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.timestamp)
        .bind(&event.region)
        .bind(&event.source)
        .bind(&event.schema_version)
        .bind(&event.correlation_id)
        .bind(&event.payload_json)
        .bind(&event.run_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!(event_id = %event.event_id, "event stored");
        } else {
            debug!(event_id = %event.event_id, "event already stored, ignored");
        }
        Ok(inserted)
    }

    async fn record_metric(&self, metric: &RegionMetric, run_id: &str) -> Result<(), PipelineError> {
        let metrics_json = serde_json::to_string(&metric.metrics)?;

        // The metric row and its lineage commit together or not at all; a
        // failure mid-way drops the transaction and rolls everything back.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT OR REPLACE INTO metrics_out (metric_id, date, region, run_id, metrics_json) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&metric.metric_id)
        .bind(&metric.date)
        .bind(&metric.region)
        .bind(run_id)
        .bind(&metrics_json)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for event_id in &metric.input_event_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO trace (event_id, metric_id, contribution_type) \
                 VALUES (?, ?, ?)",
            )
            .bind(event_id)
            .bind(&metric.metric_id)
            .bind(WINDOW_MEMBER)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            metric_id = %metric.metric_id,
            region = %metric.region,
            lineage = metric.input_event_ids.len(),
            "metric stored"
        );
        Ok(())
    }
}
