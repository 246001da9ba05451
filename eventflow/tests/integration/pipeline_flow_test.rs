// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Flow Integration Tests
//!
//! Walks a single event through every stage boundary without a broker:
//! validation decides forwarding, the window aggregates and flushes, and
//! the audit store persists the event, the metric, and the lineage that
//! ties them together.

use serde_json::{json, Value};
use sqlx::Row;
use std::sync::Arc;
use tempfile::TempDir;

use eventflow::application::services::audit::{AuditService, Disposition};
use eventflow::application::services::validator::{classify_body, ValidationOutcome};
use eventflow::infrastructure::journal::AuditJournal;
use eventflow::infrastructure::repositories::SqliteAuditRepository;
use eventflow_domain::aggregates::AggregationWindow;
use eventflow_domain::events::RegionMetric;

const EVENT_ID: &str = "550e8400-e29b-41d4-a716-446655440000";

fn happy_path_event() -> Value {
    json!({
        "event_id": EVENT_ID,
        "timestamp": "2025-01-15T10:30:00Z",
        "region": "norte",
        "source": "security.incident",
        "schema_version": "1.0",
        "payload": {
            "crime_type": "theft",
            "severity": "medium",
            "location": { "latitude": -33.4489, "longitude": -70.6693 },
            "reported_by": "citizen"
        }
    })
}

#[tokio::test]
async fn test_happy_path_event_to_lineage() {
    let event = happy_path_event();
    let body = serde_json::to_vec(&event).unwrap();

    // Validator: forwarded unchanged
    match classify_body(&body) {
        ValidationOutcome::Forward(envelope) => assert_eq!(envelope.event_id.as_str(), EVENT_ID),
        other => panic!("expected forward, got {:?}", other),
    }

    // Aggregator: counted once, flushed into a summary and one metric
    let mut window = AggregationWindow::new();
    window.observe(
        event.get("region").and_then(Value::as_str),
        event.get("source").and_then(Value::as_str),
        event.get("event_id").and_then(Value::as_str),
    );
    // A duplicate delivery inside the same window changes nothing
    window.observe(
        event.get("region").and_then(Value::as_str),
        event.get("source").and_then(Value::as_str),
        event.get("event_id").and_then(Value::as_str),
    );
    let flush = window.close().unwrap();
    assert_eq!(flush.summary.total_processed, 1);
    assert_eq!(flush.summary.stats_by_region["norte"]["security.incident"], 1);
    assert_eq!(flush.metrics.len(), 1);
    assert_eq!(flush.metrics[0].input_event_ids, vec![EVENT_ID.to_string()]);

    // Audit: event row, then metric row, then the trace between them
    let dir = TempDir::new().unwrap();
    let repository = Arc::new(
        SqliteAuditRepository::connect(dir.path().join("audit.db"))
            .await
            .unwrap(),
    );
    let service = AuditService::new(
        Arc::clone(&repository),
        AuditJournal::new(dir.path().join("audit_log.jsonl")),
    );
    let properties = lapin::BasicProperties::default();

    assert_eq!(service.ingest_event(&properties, &body).await, Disposition::Ack);
    // Redelivery collapses into the same row
    assert_eq!(service.ingest_event(&properties, &body).await, Disposition::Ack);

    let metric_body = serde_json::to_vec(&flush.metrics[0]).unwrap();
    assert_eq!(
        service.ingest_metric(&properties, &metric_body).await,
        Disposition::Ack
    );

    let row = sqlx::query("SELECT COUNT(*) AS n FROM events_in")
        .fetch_one(repository.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);

    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM trace t \
         JOIN events_in e ON e.event_id = t.event_id \
         JOIN metrics_out m ON m.metric_id = t.metric_id",
    )
    .fetch_one(repository.pool())
    .await
    .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
}

#[tokio::test]
async fn test_invalid_events_never_reach_storage() {
    // Scenario: invalid UUID, dead-lettered by the validator, so the
    // audit store never sees it
    let mut event = happy_path_event();
    event["event_id"] = json!("invalid-uuid");
    let body = serde_json::to_vec(&event).unwrap();

    match classify_body(&body) {
        ValidationOutcome::DeadLetter(reason) => assert!(reason.contains("Invalid format")),
        other => panic!("expected dead letter, got {:?}", other),
    }

    // Scenario: unknown source
    let mut event = happy_path_event();
    event["source"] = json!("unknown.event.type");
    match classify_body(&serde_json::to_vec(&event).unwrap()) {
        ValidationOutcome::DeadLetter(reason) => assert!(reason.contains("Unknown event type")),
        other => panic!("expected dead letter, got {:?}", other),
    }

    // Scenario: wrong payload type (string age)
    let mut event = happy_path_event();
    event["source"] = json!("survey.victimization");
    event["payload"] = json!({
        "survey_id": "srv-1",
        "respondent_age": "35",
        "victimization_type": "theft",
        "reported": true
    });
    match classify_body(&serde_json::to_vec(&event).unwrap()) {
        ValidationOutcome::DeadLetter(reason) => assert!(reason.contains("integer")),
        other => panic!("expected dead letter, got {:?}", other),
    }
}

#[tokio::test]
async fn test_metric_ingestion_tolerates_missing_run_id() {
    // Aggregator peers may omit run_id; ingestion defaults it rather than
    // dropping the metric
    let raw = json!({
        "metric_id": "0b41e1c6-8fd9-4f4c-9f3e-0a8f6f8b2d11",
        "date": "2025-01-15",
        "region": "norte",
        "metrics": { "security.incident": 1 },
        "input_event_ids": []
    });
    let metric: RegionMetric = serde_json::from_value(raw).unwrap();
    assert_eq!(metric.run_id, "default");
}
