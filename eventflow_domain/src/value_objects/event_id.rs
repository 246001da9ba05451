// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Identifier Value Object
//!
//! This module provides the [`EventId`] value object: the canonical
//! lowercase-hex UUID-v4 identifier carried by every event envelope.
//!
//! ## Overview
//!
//! The event identifier is the pipeline's **idempotency key**:
//!
//! - The aggregator counts each event at most once per open window by
//!   tracking observed ids
//! - The audit store uses it as the primary key of `events_in`, so repeated
//!   deliveries collapse to a single row
//! - The lineage trace references it when a metric is derived from the event
//!
//! ## Validation
//!
//! Only the canonical textual form is accepted: lowercase hexadecimal,
//! hyphen-grouped, version nibble `4`, variant nibble in `[89ab]`. An
//! uppercase or braced UUID is rejected rather than normalized; the wire
//! format is the contract.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::sync::OnceLock;

use crate::PipelineError;

/// Regex for the canonical lowercase UUID-v4 textual form.
const EVENT_ID_PATTERN: &str =
    "^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$";

fn event_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(EVENT_ID_PATTERN).expect("valid event id pattern"))
}

/// Unique event identifier in canonical lowercase UUID-v4 form.
///
/// Immutable value object; equality is structural. Serializes as a plain
/// string for wire and storage compatibility.
///
/// # Examples
///
/// ```
/// use eventflow_domain::value_objects::EventId;
///
/// let id = EventId::new("550e8400-e29b-41d4-a716-446655440000").unwrap();
/// assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
///
/// assert!(EventId::new("invalid-uuid").is_err());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates an event id from its canonical textual form.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ValidationError`] when the input does not
    /// match the canonical lowercase UUID-v4 pattern.
    pub fn new(value: impl Into<String>) -> Result<Self, PipelineError> {
        let value = value.into();
        if !event_id_regex().is_match(&value) {
            return Err(PipelineError::validation_error(format!(
                "event_id '{}' is not a canonical lowercase UUID v4",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Generates a fresh random event id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks whether a raw string is a valid canonical event id without
    /// allocating.
    pub fn is_valid(value: &str) -> bool {
        event_id_regex().is_match(value)
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_canonical_uuid_v4() {
        let id = EventId::new("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(EventId::new("invalid-uuid").is_err());
        // Uppercase is not canonical
        assert!(EventId::new("550E8400-E29B-41D4-A716-446655440000").is_err());
        // Version nibble must be 4
        assert!(EventId::new("550e8400-e29b-11d4-a716-446655440000").is_err());
        // Variant nibble must be 8, 9, a, or b
        assert!(EventId::new("550e8400-e29b-41d4-c716-446655440000").is_err());
        assert!(EventId::new("").is_err());
    }

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..32 {
            let id = EventId::generate();
            assert!(EventId::is_valid(id.as_str()));
        }
    }

    #[test]
    fn test_serde_round_trip_as_plain_string() {
        let id = EventId::new("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
