// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Store Integration Tests
//!
//! Exercises the SQLite audit repository against a real database file:
//! idempotent event storage, transactional metric/lineage writes, replace
//! semantics on resends, and the lineage race that drives requeueing.

use std::collections::BTreeMap;
use std::sync::Arc;

use lapin::BasicProperties;
use serde_json::json;
use sqlx::Row;
use tempfile::TempDir;

use eventflow::application::services::audit::{AuditService, Disposition};
use eventflow::infrastructure::journal::AuditJournal;
use eventflow::infrastructure::repositories::SqliteAuditRepository;
use eventflow_domain::events::RegionMetric;
use eventflow_domain::repositories::{AuditRepository, EventRecord};
use eventflow_domain::PipelineError;

const EVENT_ID: &str = "550e8400-e29b-41d4-a716-446655440000";
const OTHER_EVENT_ID: &str = "6fa459ea-ee8a-4ca4-894e-db77e160355e";
const METRIC_ID: &str = "0b41e1c6-8fd9-4f4c-9f3e-0a8f6f8b2d11";

async fn open_repository(dir: &TempDir) -> SqliteAuditRepository {
    SqliteAuditRepository::connect(dir.path().join("audit.db"))
        .await
        .expect("audit database should open")
}

fn sample_record(event_id: &str) -> EventRecord {
    let event = json!({
        "event_id": event_id,
        "timestamp": "2025-01-15T10:30:00Z",
        "region": "norte",
        "source": "security.incident",
        "schema_version": "1.0",
        "payload": { "crime_type": "theft" }
    });
    EventRecord::from_value(&event, "default").unwrap()
}

fn sample_metric(event_ids: &[&str]) -> RegionMetric {
    RegionMetric {
        metric_id: METRIC_ID.to_string(),
        date: "2025-01-15".to_string(),
        region: "norte".to_string(),
        run_id: "default".to_string(),
        metrics: BTreeMap::from([("security.incident".to_string(), event_ids.len() as u64)]),
        input_event_ids: event_ids.iter().map(|id| id.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_event_storage_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let repository = open_repository(&dir).await;
    let record = sample_record(EVENT_ID);

    assert!(repository.record_event(&record).await.unwrap());
    // Redelivery of the same event is ignored, not an error
    assert!(!repository.record_event(&record).await.unwrap());

    let row = sqlx::query("SELECT COUNT(*) AS n FROM events_in")
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
}

#[tokio::test]
async fn test_metric_commits_with_lineage() {
    let dir = TempDir::new().unwrap();
    let repository = open_repository(&dir).await;

    repository.record_event(&sample_record(EVENT_ID)).await.unwrap();
    repository.record_event(&sample_record(OTHER_EVENT_ID)).await.unwrap();

    let metric = sample_metric(&[EVENT_ID, OTHER_EVENT_ID]);
    repository.record_metric(&metric, "default").await.unwrap();

    let row = sqlx::query("SELECT COUNT(*) AS n FROM trace WHERE metric_id = ?")
        .bind(METRIC_ID)
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 2);

    let row = sqlx::query("SELECT contribution_type FROM trace WHERE event_id = ?")
        .bind(EVENT_ID)
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("contribution_type"), "window_member");
}

#[tokio::test]
async fn test_metric_resend_replaces_row() {
    let dir = TempDir::new().unwrap();
    let repository = open_repository(&dir).await;
    repository.record_event(&sample_record(EVENT_ID)).await.unwrap();

    let metric = sample_metric(&[EVENT_ID]);
    repository.record_metric(&metric, "default").await.unwrap();

    // Resend with a different run id overwrites, leaving one row
    repository.record_metric(&metric, "rerun-1").await.unwrap();

    let row = sqlx::query("SELECT COUNT(*) AS n, MAX(run_id) AS run_id FROM metrics_out")
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
    assert_eq!(row.get::<String, _>("run_id"), "rerun-1");

    // Lineage was rebuilt, not duplicated
    let row = sqlx::query("SELECT COUNT(*) AS n FROM trace")
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
}

#[tokio::test]
async fn test_lineage_race_rolls_back_and_resolves() {
    let dir = TempDir::new().unwrap();
    let repository = open_repository(&dir).await;

    // Metric arrives before its event: FK violation, nothing persisted
    let metric = sample_metric(&[EVENT_ID]);
    let error = repository.record_metric(&metric, "default").await.unwrap_err();
    assert!(matches!(error, PipelineError::LineageViolation(_)));

    let row = sqlx::query("SELECT COUNT(*) AS n FROM metrics_out")
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);

    // The event writer catches up; the redelivered metric now commits
    repository.record_event(&sample_record(EVENT_ID)).await.unwrap();
    repository.record_metric(&metric, "default").await.unwrap();

    let row = sqlx::query("SELECT COUNT(*) AS n FROM trace")
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
}

#[tokio::test]
async fn test_ingest_dispositions_follow_the_taxonomy() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(open_repository(&dir).await);
    let journal = AuditJournal::new(dir.path().join("audit_log.jsonl"));
    let service = AuditService::new(Arc::clone(&repository), journal.clone());
    let properties = BasicProperties::default();

    // Undecodable body: poison, dropped with ack
    assert_eq!(
        service.ingest_event(&properties, b"not json").await,
        Disposition::Ack
    );

    // Missing required field: poison, dropped with ack
    let incomplete = serde_json::to_vec(&json!({ "event_id": EVENT_ID })).unwrap();
    assert_eq!(
        service.ingest_event(&properties, &incomplete).await,
        Disposition::Ack
    );

    // Valid event: stored, acked, journaled
    let event = json!({
        "event_id": EVENT_ID,
        "timestamp": "2025-01-15T10:30:00Z",
        "region": "norte",
        "source": "security.incident",
        "schema_version": "1.0",
        "payload": { "crime_type": "theft" }
    });
    let body = serde_json::to_vec(&event).unwrap();
    assert_eq!(service.ingest_event(&properties, &body).await, Disposition::Ack);

    let journal_text = tokio::fs::read_to_string(journal.path()).await.unwrap();
    assert_eq!(journal_text.lines().count(), 1);
    assert!(journal_text.contains(EVENT_ID));

    // Metric referencing an unaudited event: requeue until the race resolves
    let racing = serde_json::to_vec(&sample_metric(&[OTHER_EVENT_ID])).unwrap();
    assert_eq!(
        service.ingest_metric(&properties, &racing).await,
        Disposition::NackRequeue
    );

    // Metric over the audited event: stored and acked
    let settled = serde_json::to_vec(&sample_metric(&[EVENT_ID])).unwrap();
    assert_eq!(
        service.ingest_metric(&properties, &settled).await,
        Disposition::Ack
    );
}

#[tokio::test]
async fn test_run_id_header_overrides_metric_payload() {
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(open_repository(&dir).await);
    let journal = AuditJournal::new(dir.path().join("audit_log.jsonl"));
    let service = AuditService::new(Arc::clone(&repository), journal);

    repository.record_event(&sample_record(EVENT_ID)).await.unwrap();

    let mut headers = lapin::types::FieldTable::default();
    headers.insert(
        "run_id".into(),
        lapin::types::AMQPValue::LongString("run-from-header".into()),
    );
    let properties = BasicProperties::default().with_headers(headers);

    let body = serde_json::to_vec(&sample_metric(&[EVENT_ID])).unwrap();
    assert_eq!(service.ingest_metric(&properties, &body).await, Disposition::Ack);

    let row = sqlx::query("SELECT run_id FROM metrics_out WHERE metric_id = ?")
        .bind(METRIC_ID)
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("run_id"), "run-from-header");
}
