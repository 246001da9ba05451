// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Dead-Letter Envelope
//!
//! The wrapper published to `dlq_exchange` for messages the pipeline cannot
//! process. The envelope has exactly four keys (`original_event`, `error`,
//! `failed_at`, `service`) and that shape is part of the external contract:
//! DLQ consumers are out-of-band tooling that patterns on those keys.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire timestamp format shared with the event envelope.
const FAILED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Dead-letter wrapper for a message that permanently failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The parsed original message, or its raw text when the body was not
    /// valid JSON.
    pub original_event: Value,
    pub error: String,
    /// UTC instant of the failure, `YYYY-MM-DDTHH:MM:SSZ`.
    pub failed_at: String,
    /// Name of the stage that gave up on the message.
    pub service: String,
}

impl DeadLetter {
    /// Wraps a raw delivery body with its failure reason.
    ///
    /// The body is re-parsed so DLQ consumers get structured JSON whenever
    /// the original was parseable; otherwise the lossy-decoded text is
    /// preserved as a string.
    pub fn wrap(body: &[u8], error: impl Into<String>, service: impl Into<String>) -> Self {
        let original_event = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
        };
        Self {
            original_event,
            error: error.into(),
            failed_at: Utc::now().format(FAILED_AT_FORMAT).to_string(),
            service: service.into(),
        }
    }
}
