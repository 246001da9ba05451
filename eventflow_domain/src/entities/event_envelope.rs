// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Envelope Entity
//!
//! This module provides the typed view of the wire-format event envelope
//! that flows through the pipeline, together with the tagged payload variant
//! dispatched on the `source` field.
//!
//! ## Overview
//!
//! Every event, regardless of origin, shares a common envelope:
//!
//! - `event_id`: canonical UUID-v4, the idempotency key
//! - `timestamp`: UTC instant in `YYYY-MM-DDTHH:MM:SSZ` form
//! - `region`: one of the five recognized regions
//! - `source`: dotted tag naming the payload kind, doubling as the broker
//!   routing key
//! - `schema_version`: opaque version string
//! - `correlation_id`: optional opaque correlation string
//! - `payload`: nested object whose required keys depend on `source`
//!
//! ## Identity
//!
//! The envelope is an entity: its identity is `event_id` and persists across
//! redeliveries, replays, and storage. Two deliveries of the same envelope
//! are the *same* event, which is what makes deduplication and
//! `INSERT OR IGNORE` meaningful downstream.
//!
//! ## Typed vs. raw
//!
//! The validator operates on raw `serde_json::Value` so the body can be
//! republished byte-for-byte. [`EventEnvelope`] is the post-validation view
//! for code that wants typed access; constructing one from an unvalidated
//! value performs the same envelope checks the schema registry applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::value_objects::{EventId, Region};
use crate::PipelineError;

/// Recognized event sources; the dotted tag is also the broker routing key.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EventSource {
    SecurityIncident,
    VictimizationSurvey,
    MigrationCase,
}

impl EventSource {
    /// All recognized sources, in routing-key order.
    pub const ALL: [EventSource; 3] = [
        EventSource::SecurityIncident,
        EventSource::VictimizationSurvey,
        EventSource::MigrationCase,
    ];

    /// Returns the dotted wire tag / routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::SecurityIncident => "security.incident",
            EventSource::VictimizationSurvey => "survey.victimization",
            EventSource::MigrationCase => "migration.case",
        }
    }
}

impl FromStr for EventSource {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "security.incident" => Ok(EventSource::SecurityIncident),
            "survey.victimization" => Ok(EventSource::VictimizationSurvey),
            "migration.case" => Ok(EventSource::MigrationCase),
            other => Err(PipelineError::validation_error(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

impl Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Geographic coordinates carried by security incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Payload of a `security.incident` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub crime_type: String,
    pub severity: String,
    pub location: GeoLocation,
    pub reported_by: String,
}

/// Payload of a `survey.victimization` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VictimizationSurvey {
    pub survey_id: String,
    pub respondent_age: i64,
    pub victimization_type: String,
    pub reported: bool,
}

/// Payload of a `migration.case` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationCase {
    pub case_id: String,
    pub case_type: String,
    pub status: String,
    pub origin_country: String,
}

/// Tagged payload variant, dispatched on the envelope `source`.
///
/// `Unknown` preserves payloads whose source tag is not recognized; such
/// envelopes never pass validation, but replay tooling still needs to carry
/// them around without loss.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SecurityIncident(SecurityIncident),
    VictimizationSurvey(VictimizationSurvey),
    MigrationCase(MigrationCase),
    Unknown(Value),
}

impl EventPayload {
    /// Decodes a raw payload object according to the source tag.
    ///
    /// An unrecognized source yields [`EventPayload::Unknown`] rather than an
    /// error; schema enforcement is the registry's job, not the decoder's.
    pub fn decode(source: &str, payload: &Value) -> Result<Self, PipelineError> {
        match source.parse::<EventSource>() {
            Ok(EventSource::SecurityIncident) => {
                let typed: SecurityIncident = serde_json::from_value(payload.clone())?;
                Ok(EventPayload::SecurityIncident(typed))
            }
            Ok(EventSource::VictimizationSurvey) => {
                let typed: VictimizationSurvey = serde_json::from_value(payload.clone())?;
                Ok(EventPayload::VictimizationSurvey(typed))
            }
            Ok(EventSource::MigrationCase) => {
                let typed: MigrationCase = serde_json::from_value(payload.clone())?;
                Ok(EventPayload::MigrationCase(typed))
            }
            Err(_) => Ok(EventPayload::Unknown(payload.clone())),
        }
    }
}

/// Typed view of a validated event envelope.
///
/// The `timestamp` stays in its wire form; the envelope never reformats it,
/// so republished and audited events are byte-identical to what arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub timestamp: String,
    pub region: Region,
    pub source: String,
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub payload: Value,
}

impl EventEnvelope {
    /// Builds a typed envelope from a raw JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SerializationError`] when required envelope
    /// fields are missing or have the wrong shape, and
    /// [`PipelineError::ValidationError`] when `event_id` or `region` fail
    /// their value-object checks.
    pub fn from_value(value: &Value) -> Result<Self, PipelineError> {
        fn field<'a>(
            object: &'a serde_json::Map<String, Value>,
            name: &str,
        ) -> Result<&'a Value, PipelineError> {
            object.get(name).ok_or_else(|| {
                PipelineError::serialization_error(format!("missing field '{}'", name))
            })
        }

        fn string_field(
            object: &serde_json::Map<String, Value>,
            name: &str,
        ) -> Result<String, PipelineError> {
            field(object, name)?
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| {
                    PipelineError::serialization_error(format!("field '{}' is not a string", name))
                })
        }

        let object = value
            .as_object()
            .ok_or_else(|| PipelineError::serialization_error("event is not a JSON object"))?;

        let event_id = EventId::new(string_field(object, "event_id")?)?;
        let region = string_field(object, "region")?.parse::<Region>()?;

        Ok(Self {
            event_id,
            timestamp: string_field(object, "timestamp")?,
            region,
            source: string_field(object, "source")?,
            schema_version: string_field(object, "schema_version")?,
            correlation_id: object
                .get("correlation_id")
                .and_then(Value::as_str)
                .map(str::to_owned),
            payload: field(object, "payload")?.clone(),
        })
    }

    /// Decodes the payload into its tagged variant.
    pub fn typed_payload(&self) -> Result<EventPayload, PipelineError> {
        EventPayload::decode(&self.source, &self.payload)
    }
}
