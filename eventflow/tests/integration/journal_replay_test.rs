// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Journal / Replay Integration Tests
//!
//! Round-trips the audit journal: what the audit service appends, the
//! replay reader must be able to recover and route, with corrupt lines
//! tolerated in between.

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use eventflow::application::services::replay::{recover_event, replay_routing_key};
use eventflow::infrastructure::journal::{AuditJournal, JournalEntry};

fn sample_event(event_id: &str, source: &str) -> Value {
    json!({
        "event_id": event_id,
        "timestamp": "2025-01-15T10:30:00Z",
        "region": "norte",
        "source": source,
        "schema_version": "1.0",
        "payload": {}
    })
}

/// What the replay loop does per line, minus the broker: parse, unwrap
/// the journal envelope, recover the event, pick the routing key.
fn replay_line(line: &str) -> Option<(Value, String)> {
    let record: Value = serde_json::from_str(line.trim()).ok()?;
    let record = record.get("event_content").unwrap_or(&record);
    let event = recover_event(record);
    Some((event.clone(), replay_routing_key(event).to_string()))
}

#[tokio::test]
async fn test_journal_round_trip_preserves_events() {
    let dir = TempDir::new().unwrap();
    let journal = AuditJournal::new(dir.path().join("audit_log.jsonl"));

    let original = sample_event("550e8400-e29b-41d4-a716-446655440000", "security.incident");
    journal.append(&original).await.unwrap();

    let content = tokio::fs::read_to_string(journal.path()).await.unwrap();
    let (event, routing_key) = replay_line(content.lines().next().unwrap()).unwrap();

    assert_eq!(event, original);
    assert_eq!(routing_key, "security.incident");
}

#[tokio::test]
async fn test_corrupt_and_blank_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let journal = AuditJournal::new(dir.path().join("audit_log.jsonl"));
    journal
        .append(&sample_event("6fa459ea-ee8a-4ca4-894e-db77e160355e", "migration.case"))
        .await
        .unwrap();

    // Simulate a crash mid-append plus stray blank lines
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(journal.path())
        .await
        .unwrap();
    file.write_all(b"\n{\"audit_timestamp\": \"2025-01-15T10:3").await.unwrap();
    file.flush().await.unwrap();

    let content = tokio::fs::read_to_string(journal.path()).await.unwrap();
    let replayable: Vec<_> = content.lines().filter_map(replay_line).collect();

    assert_eq!(replayable.len(), 1);
    assert_eq!(replayable[0].1, "migration.case");
}

#[tokio::test]
async fn test_foreign_journal_shapes_are_recovered() {
    // Records written by other tooling: bare events and dead-letter wrappers
    let bare = sample_event("16fd2706-8baf-433b-82eb-8c7fada847da", "survey.victimization");
    let (event, routing_key) = replay_line(&bare.to_string()).unwrap();
    assert_eq!(event["event_id"], "16fd2706-8baf-433b-82eb-8c7fada847da");
    assert_eq!(routing_key, "survey.victimization");

    let dead_letter = json!({
        "original_event": sample_event("550e8400-e29b-41d4-a716-446655440000", "security.incident"),
        "error": "Max retries exceeded: simulated network failure",
        "failed_at": "2025-01-15T10:30:05Z",
        "service": "validator"
    });
    let (event, routing_key) = replay_line(&dead_letter.to_string()).unwrap();
    assert_eq!(event["source"], "security.incident");
    assert_eq!(routing_key, "security.incident");

    // A record with no source routes under the generic fallback
    let sourceless = json!({ "event_id": "anonymous" });
    let (_, routing_key) = replay_line(&sourceless.to_string()).unwrap();
    assert_eq!(routing_key, "replay.generic");
}

#[tokio::test]
async fn test_journal_entry_shape_matches_contract() {
    let dir = TempDir::new().unwrap();
    let journal = AuditJournal::new(dir.path().join("audit_log.jsonl"));
    journal
        .append(&sample_event("550e8400-e29b-41d4-a716-446655440000", "security.incident"))
        .await
        .unwrap();

    let content = tokio::fs::read_to_string(journal.path()).await.unwrap();
    let entry: JournalEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert!(!entry.audit_timestamp.is_empty());
    assert_eq!(entry.event_content["region"], "norte");

    // Exactly the two contract keys, nothing else
    let raw: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    let mut keys: Vec<_> = raw.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, ["audit_timestamp", "event_content"]);
}
