// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Schema Registry
//!
//! Declarative validation rules for the event envelope and the per-source
//! payload shapes, evaluated by the validator on every delivery.
//!
//! ## Overview
//!
//! The registry is a table of rules, not a general JSON-Schema engine:
//!
//! - **Base rules** apply to every envelope: object type, required fields,
//!   the canonical UUID-v4 pattern for `event_id`, the `YYYY-MM-DDTHH:MM:SSZ`
//!   timestamp pattern, the five-region enum, and an object-typed `payload`.
//! - **Payload rules** are keyed by `source` and name the required payload
//!   fields together with their expected types. A source without a table
//!   entry fails with an unknown-event-type reason.
//!
//! ## Failure reporting
//!
//! Each rule produces a distinct, human-readable reason; the validator
//! forwards that reason verbatim into the dead-letter envelope so poison
//! messages can be diagnosed out-of-band. Reasons are values, not log lines:
//! the registry never logs.
//!
//! ## Type strictness
//!
//! JSON type checks are exact. `respondent_age` must be an integer number:
//! a boolean, a float, or a numeric string all fail with a wrong-type
//! reason. This mirrors the wire contract rather than any language's
//! coercion rules.

use serde_json::Value;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::entities::EventSource;
use crate::value_objects::{EventId, Region};

/// Timestamp wire pattern: `YYYY-MM-DDTHH:MM:SSZ`.
const TIMESTAMP_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$";

fn timestamp_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(TIMESTAMP_PATTERN).expect("valid timestamp pattern"))
}

/// Envelope fields every event must carry.
const REQUIRED_ENVELOPE_FIELDS: &[&str] = &[
    "event_id",
    "timestamp",
    "region",
    "source",
    "schema_version",
    "payload",
];

/// Classification of a validation failure.
///
/// The kind drives tests and metrics; the `reason` string is the
/// human-readable message carried into the dead-letter envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailureKind {
    NotAnObject,
    MissingField,
    WrongType,
    PatternMismatch,
    EnumMismatch,
    UnknownSource,
}

/// A single failed rule with its human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub kind: ValidationFailureKind,
    pub reason: String,
}

impl ValidationFailure {
    fn new(kind: ValidationFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ValidationFailure {}

/// Expected shape of one required payload field.
#[derive(Debug, Clone, Copy)]
enum FieldExpectation {
    /// Field must be present; any JSON type is accepted.
    Present,
    /// Field must be a JSON string.
    String,
    /// Field must be an integer number (not a boolean, not a string).
    Integer,
    /// Field must be a boolean.
    Boolean,
    /// Field must be an object containing the listed keys.
    ObjectWith(&'static [&'static str]),
}

impl FieldExpectation {
    fn describe(&self) -> &'static str {
        match self {
            FieldExpectation::Present => "value",
            FieldExpectation::String => "string",
            FieldExpectation::Integer => "integer",
            FieldExpectation::Boolean => "boolean",
            FieldExpectation::ObjectWith(_) => "object",
        }
    }
}

/// One required field of a payload schema.
#[derive(Debug, Clone, Copy)]
struct FieldRule {
    name: &'static str,
    expected: FieldExpectation,
}

const SECURITY_INCIDENT_RULES: &[FieldRule] = &[
    FieldRule {
        name: "crime_type",
        expected: FieldExpectation::String,
    },
    FieldRule {
        name: "severity",
        expected: FieldExpectation::String,
    },
    FieldRule {
        name: "location",
        expected: FieldExpectation::ObjectWith(&["latitude", "longitude"]),
    },
    FieldRule {
        name: "reported_by",
        expected: FieldExpectation::String,
    },
];

const VICTIMIZATION_SURVEY_RULES: &[FieldRule] = &[
    FieldRule {
        name: "survey_id",
        expected: FieldExpectation::Present,
    },
    FieldRule {
        name: "respondent_age",
        expected: FieldExpectation::Integer,
    },
    FieldRule {
        name: "victimization_type",
        expected: FieldExpectation::Present,
    },
    FieldRule {
        name: "reported",
        expected: FieldExpectation::Boolean,
    },
];

const MIGRATION_CASE_RULES: &[FieldRule] = &[
    FieldRule {
        name: "case_id",
        expected: FieldExpectation::Present,
    },
    FieldRule {
        name: "case_type",
        expected: FieldExpectation::Present,
    },
    FieldRule {
        name: "status",
        expected: FieldExpectation::String,
    },
    FieldRule {
        name: "origin_country",
        expected: FieldExpectation::Present,
    },
];

fn payload_rules(source: EventSource) -> &'static [FieldRule] {
    match source {
        EventSource::SecurityIncident => SECURITY_INCIDENT_RULES,
        EventSource::VictimizationSurvey => VICTIMIZATION_SURVEY_RULES,
        EventSource::MigrationCase => MIGRATION_CASE_RULES,
    }
}

/// Validates a raw event against the base envelope rules and the payload
/// rules for its source.
///
/// Returns the first failed rule; rules are evaluated in declaration order
/// so failure messages are deterministic.
///
/// # Examples
///
/// ```
/// use eventflow_domain::services::schema_registry::validate_event;
/// use serde_json::json;
///
/// let event = json!({
///     "event_id": "550e8400-e29b-41d4-a716-446655440000",
///     "timestamp": "2025-01-15T10:30:00Z",
///     "region": "norte",
///     "source": "migration.case",
///     "schema_version": "1.0",
///     "payload": {
///         "case_id": "mig-12345",
///         "case_type": "asylum",
///         "status": "pending",
///         "origin_country": "Haiti"
///     }
/// });
/// assert!(validate_event(&event).is_ok());
/// ```
pub fn validate_event(event: &Value) -> Result<(), ValidationFailure> {
    let object = event.as_object().ok_or_else(|| {
        ValidationFailure::new(ValidationFailureKind::NotAnObject, "event is not a JSON object")
    })?;

    fn string_field<'a>(
        object: &'a serde_json::Map<String, Value>,
        name: &str,
    ) -> Result<&'a str, ValidationFailure> {
        object.get(name).and_then(Value::as_str).ok_or_else(|| {
            ValidationFailure::new(
                ValidationFailureKind::WrongType,
                format!("field '{}' must be a string", name),
            )
        })
    }

    for field in REQUIRED_ENVELOPE_FIELDS {
        if !object.contains_key(*field) {
            return Err(ValidationFailure::new(
                ValidationFailureKind::MissingField,
                format!("missing required field '{}'", field),
            ));
        }
    }

    let event_id = string_field(object, "event_id")?;
    if !EventId::is_valid(event_id) {
        return Err(ValidationFailure::new(
            ValidationFailureKind::PatternMismatch,
            format!(
                "Invalid format: event_id '{}' does not match the canonical UUID v4 pattern",
                event_id
            ),
        ));
    }

    let timestamp = string_field(object, "timestamp")?;
    if !timestamp_regex().is_match(timestamp) {
        return Err(ValidationFailure::new(
            ValidationFailureKind::PatternMismatch,
            format!(
                "Invalid format: timestamp '{}' does not match YYYY-MM-DDTHH:MM:SSZ",
                timestamp
            ),
        ));
    }

    let region = string_field(object, "region")?;
    if region.parse::<Region>().is_err() {
        return Err(ValidationFailure::new(
            ValidationFailureKind::EnumMismatch,
            format!(
                "region '{}' is not one of norte, sur, centro, este, oeste",
                region
            ),
        ));
    }

    string_field(object, "schema_version")?;

    let payload = object["payload"].as_object().ok_or_else(|| {
        ValidationFailure::new(
            ValidationFailureKind::WrongType,
            "field 'payload' must be an object",
        )
    })?;

    let source = string_field(object, "source")?;
    let rules = match EventSource::from_str(source) {
        Ok(source) => payload_rules(source),
        Err(_) => {
            return Err(ValidationFailure::new(
                ValidationFailureKind::UnknownSource,
                format!("Unknown event type: {}", source),
            ));
        }
    };

    for rule in rules {
        let value = payload.get(rule.name).ok_or_else(|| {
            ValidationFailure::new(
                ValidationFailureKind::MissingField,
                format!("payload missing required field '{}'", rule.name),
            )
        })?;
        check_field(rule, value)?;
    }

    Ok(())
}

fn check_field(rule: &FieldRule, value: &Value) -> Result<(), ValidationFailure> {
    let wrong_type = || {
        ValidationFailure::new(
            ValidationFailureKind::WrongType,
            format!(
                "payload field '{}' must be a {}",
                rule.name,
                rule.expected.describe()
            ),
        )
    };

    match rule.expected {
        FieldExpectation::Present => Ok(()),
        FieldExpectation::String => value.as_str().map(|_| ()).ok_or_else(wrong_type),
        FieldExpectation::Integer => value.as_i64().map(|_| ()).ok_or_else(wrong_type),
        FieldExpectation::Boolean => value.as_bool().map(|_| ()).ok_or_else(wrong_type),
        FieldExpectation::ObjectWith(keys) => {
            let object = value.as_object().ok_or_else(wrong_type)?;
            for key in keys {
                if !object.contains_key(*key) {
                    return Err(ValidationFailure::new(
                        ValidationFailureKind::MissingField,
                        format!("payload field '{}' is missing key '{}'", rule.name, key),
                    ));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_incident() -> Value {
        json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
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

    fn valid_survey() -> Value {
        json!({
            "event_id": "6fa459ea-ee8a-4ca4-894e-db77e160355e",
            "timestamp": "2025-02-01T08:00:00Z",
            "region": "sur",
            "source": "survey.victimization",
            "schema_version": "1.0",
            "payload": {
                "survey_id": "srv-10001",
                "respondent_age": 35,
                "victimization_type": "theft",
                "reported": true
            }
        })
    }

    #[test]
    fn test_happy_path_all_sources() {
        assert!(validate_event(&valid_incident()).is_ok());
        assert!(validate_event(&valid_survey()).is_ok());

        let migration = json!({
            "event_id": "16fd2706-8baf-433b-82eb-8c7fada847da",
            "timestamp": "2025-03-10T23:59:59Z",
            "region": "centro",
            "source": "migration.case",
            "schema_version": "2.1",
            "payload": {
                "case_id": "mig-55555",
                "case_type": "asylum",
                "status": "pending",
                "origin_country": "Venezuela"
            }
        });
        assert!(validate_event(&migration).is_ok());
    }

    #[test]
    fn test_rejects_non_object() {
        let failure = validate_event(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::NotAnObject);
    }

    #[test]
    fn test_missing_envelope_field() {
        let mut event = valid_incident();
        event.as_object_mut().unwrap().remove("schema_version");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::MissingField);
        assert!(failure.reason.contains("schema_version"));
    }

    #[test]
    fn test_invalid_event_id_format() {
        let mut event = valid_incident();
        event["event_id"] = json!("invalid-uuid");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::PatternMismatch);
        assert!(failure.reason.contains("Invalid format"));
    }

    #[test]
    fn test_invalid_timestamp_format() {
        let mut event = valid_incident();
        event["timestamp"] = json!("2025-01-15 10:30:00");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::PatternMismatch);
        assert!(failure.reason.contains("timestamp"));
    }

    #[test]
    fn test_region_outside_enum() {
        let mut event = valid_incident();
        event["region"] = json!("atacama");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::EnumMismatch);
    }

    #[test]
    fn test_unknown_source() {
        let mut event = valid_incident();
        event["source"] = json!("unknown.event.type");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::UnknownSource);
        assert!(failure.reason.contains("Unknown event type"));
    }

    #[test]
    fn test_payload_missing_required_field() {
        let mut event = valid_incident();
        event["payload"].as_object_mut().unwrap().remove("severity");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::MissingField);
        assert!(failure.reason.contains("severity"));
    }

    #[test]
    fn test_respondent_age_must_be_integer() {
        // A numeric string is not an integer
        let mut event = valid_survey();
        event["payload"]["respondent_age"] = json!("35");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::WrongType);
        assert!(failure.reason.contains("integer"));

        // Neither is a boolean
        let mut event = valid_survey();
        event["payload"]["respondent_age"] = json!(true);
        assert_eq!(
            validate_event(&event).unwrap_err().kind,
            ValidationFailureKind::WrongType
        );

        // Neither is a float
        let mut event = valid_survey();
        event["payload"]["respondent_age"] = json!(35.5);
        assert_eq!(
            validate_event(&event).unwrap_err().kind,
            ValidationFailureKind::WrongType
        );
    }

    #[test]
    fn test_location_requires_coordinates() {
        let mut event = valid_incident();
        event["payload"]["location"] = json!({ "latitude": -33.4 });
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::MissingField);
        assert!(failure.reason.contains("longitude"));
    }

    #[test]
    fn test_reported_must_be_boolean() {
        let mut event = valid_survey();
        event["payload"]["reported"] = json!("yes");
        let failure = validate_event(&event).unwrap_err();
        assert_eq!(failure.kind, ValidationFailureKind::WrongType);
        assert!(failure.reason.contains("reported"));
    }

    #[test]
    fn test_extra_payload_fields_are_allowed() {
        let mut event = valid_survey();
        event["payload"]["incident_date"] = json!("2025-02-01");
        assert!(validate_event(&event).is_ok());
    }
}
