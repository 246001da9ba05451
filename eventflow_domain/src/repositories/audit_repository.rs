// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Repository Port
//!
//! Infrastructure port for the durable audit sink. The domain defines the
//! contract (idempotent event persistence, transactional metric/lineage
//! persistence); the SQLite implementation lives in infrastructure.
//!
//! ## Contract
//!
//! - [`AuditRepository::record_event`] is idempotent on `event_id`: storing
//!   the same event twice leaves a single row and reports whether this call
//!   inserted it.
//! - [`AuditRepository::record_metric`] is atomic: the metric row and every
//!   lineage trace row commit together or not at all. A metric referencing
//!   an event id that has not been stored yet fails with
//!   [`PipelineError::LineageViolation`] so the caller can negatively
//!   acknowledge and let the broker redeliver after the event writer
//!   catches up.

use async_trait::async_trait;
use serde_json::Value;

use crate::events::RegionMetric;
use crate::PipelineError;

/// Fields every audited event must carry; anything less is poison input.
const REQUIRED_AUDIT_FIELDS: &[&str] = &["event_id", "timestamp", "region", "source"];

/// Flattened view of a validated event, ready for the `events_in` table.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_id: String,
    pub timestamp: String,
    pub region: String,
    pub source: String,
    pub schema_version: Option<String>,
    pub correlation_id: Option<String>,
    /// The event's payload object, serialized back to JSON text. The other
    /// envelope fields live in their own columns.
    pub payload_json: String,
    pub run_id: String,
}

impl EventRecord {
    /// Builds an audit record from a raw event value.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ValidationError`] when one of the required
    /// fields (`event_id`, `timestamp`, `region`, `source`) is missing or
    /// not a string. The caller treats that as poison: acknowledge and
    /// drop, never retry.
    pub fn from_value(event: &Value, run_id: impl Into<String>) -> Result<Self, PipelineError> {
        let object = event
            .as_object()
            .ok_or_else(|| PipelineError::validation_error("event is not a JSON object"))?;

        let required = |name: &str| -> Result<String, PipelineError> {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    PipelineError::validation_error(format!("missing required field '{}'", name))
                })
        };

        for field in REQUIRED_AUDIT_FIELDS {
            required(field)?;
        }

        Ok(Self {
            event_id: required("event_id")?,
            timestamp: required("timestamp")?,
            region: required("region")?,
            source: required("source")?,
            schema_version: object
                .get("schema_version")
                .and_then(Value::as_str)
                .map(str::to_owned),
            correlation_id: object
                .get("correlation_id")
                .and_then(Value::as_str)
                .map(str::to_owned),
            payload_json: serde_json::to_string(
                object.get("payload").unwrap_or(&Value::Object(Default::default())),
            )?,
            run_id: run_id.into(),
        })
    }
}

/// Durable sink for audited events, metrics, and their lineage.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Stores one validated event; idempotent on `event_id`.
    ///
    /// Returns `true` when this call inserted the row, `false` when the
    /// event was already present.
    async fn record_event(&self, event: &EventRecord) -> Result<bool, PipelineError>;

    /// Stores one metric and its lineage trace in a single transaction.
    ///
    /// A resend with the same `metric_id` replaces the metric row; trace
    /// rows are idempotent. `run_id` is the resolved run identifier
    /// (broker header over payload field over `"default"`).
    async fn record_metric(&self, metric: &RegionMetric, run_id: &str) -> Result<(), PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_full_event() {
        let event = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "timestamp": "2025-01-15T10:30:00Z",
            "region": "norte",
            "source": "security.incident",
            "schema_version": "1.0",
            "correlation_id": "corr-1234",
            "payload": { "crime_type": "theft" }
        });

        let record = EventRecord::from_value(&event, "default").unwrap();
        assert_eq!(record.event_id, "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(record.schema_version.as_deref(), Some("1.0"));
        assert_eq!(record.run_id, "default");

        // The payload column holds only the payload object
        let stored: Value = serde_json::from_str(&record.payload_json).unwrap();
        assert_eq!(stored, json!({ "crime_type": "theft" }));
    }

    #[test]
    fn test_missing_required_field_is_poison() {
        let event = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "timestamp": "2025-01-15T10:30:00Z",
            "region": "norte"
        });
        let err = EventRecord::from_value(&event, "default").unwrap_err();
        assert!(err.is_poison() || matches!(err, PipelineError::ValidationError(_)));
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_optional_fields_default_to_none() {
        let event = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "timestamp": "2025-01-15T10:30:00Z",
            "region": "norte",
            "source": "security.incident"
        });
        let record = EventRecord::from_value(&event, "replay-7").unwrap();
        assert_eq!(record.schema_version, None);
        assert_eq!(record.correlation_id, None);
        assert_eq!(record.run_id, "replay-7");
    }
}
