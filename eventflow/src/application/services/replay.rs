// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Replay Service
//!
//! Streams the audit journal back into `events_exchange` so the whole
//! pipeline reprocesses history. Replayed events re-enter through
//! validation like any fresh event; the `x-replay: true` header lets
//! downstream stages tell them apart.
//!
//! ## Record recovery
//!
//! Journal lines vary in shape depending on who wrote them. The inner
//! event is recovered by checking, in order: an `event` object, an
//! `original_event` value, then the record itself. Lines that do not parse
//! at all are skipped; partial trailing lines after a crash are expected,
//! not exceptional.
//!
//! ## Pacing
//!
//! Publishes are throttled to one per ~50 ms and do not wait for any
//! downstream acknowledgement; replay is fire-and-forget into a durable
//! exchange.

use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use eventflow_bootstrap::{CancellationToken, ConsoleLogger};
use eventflow_domain::PipelineError;

use crate::infrastructure::broker::{
    amqp_error, connect_with_retry, declare_topology, publish_json_with_headers, replay_headers,
    EVENTS_EXCHANGE, REPLAY_FALLBACK_ROUTING_KEY,
};
use crate::infrastructure::config::{BrokerSettings, ReplaySettings};
use crate::infrastructure::runtime::AppResult;

/// Pause between publishes.
const REPLAY_THROTTLE: Duration = Duration::from_millis(50);

/// Progress log cadence.
const PROGRESS_EVERY: u64 = 10;

/// Recovers the replayable event from one journal record.
///
/// Precedence: a nested `event` object, then `original_event` (dead-letter
/// wrappers), then the record itself.
pub fn recover_event(record: &Value) -> &Value {
    if let Some(event) = record.get("event") {
        if event.is_object() {
            return event;
        }
    }
    if let Some(original) = record.get("original_event") {
        return original;
    }
    record
}

/// Routing key for a recovered event: its `source`, or the generic
/// fallback.
pub fn replay_routing_key(event: &Value) -> &str {
    event
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or(REPLAY_FALLBACK_ROUTING_KEY)
}

/// The replay reader.
pub struct ReplayService {
    settings: ReplaySettings,
}

impl ReplayService {
    pub fn new(settings: ReplaySettings) -> Self {
        Self { settings }
    }

    /// Replays the journal once, start to finish, then returns.
    pub async fn run(&self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        let path = Path::new(&self.settings.log_file_path);
        if !path.exists() {
            warn!(
                path = %path.display(),
                "no audit journal found; run the pipeline first to generate one"
            );
            return Ok(());
        }

        let logger = ConsoleLogger::for_service("replay");
        let connection = match connect_with_retry(broker, &token, &logger).await {
            Ok(connection) => connection,
            Err(PipelineError::Cancelled(_)) => return Ok(()),
            Err(error) => return Err(error),
        };
        let channel = connection.create_channel().await.map_err(amqp_error)?;
        declare_topology(&channel, &logger).await?;

        info!(path = %path.display(), exchange = EVENTS_EXCHANGE, "starting replay");

        let file = tokio::fs::File::open(path).await?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut count: u64 = 0;

        while let Some(line) = lines.next_line().await? {
            if token.is_cancelled() {
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record: Value = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(_) => {
                    warn!("corrupt journal line skipped");
                    continue;
                }
            };

            // The journal nests events under event_content; older tooling
            // wrote the event bare, so recovery handles both.
            let record = record.get("event_content").unwrap_or(&record);
            let event = recover_event(record);
            let routing_key = replay_routing_key(event);
            let body = serde_json::to_vec(event)?;

            publish_json_with_headers(
                &channel,
                EVENTS_EXCHANGE,
                routing_key,
                &body,
                replay_headers(),
            )
            .await?;

            count += 1;
            if count % PROGRESS_EVERY == 0 {
                info!(reinjected = count, "replay in progress");
            }

            tokio::time::sleep(REPLAY_THROTTLE).await;
        }

        let _ = connection.close(200, "replay finished").await;
        info!(total = count, "replay finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recovers_nested_event_object_first() {
        let record = json!({
            "event": { "event_id": "a", "source": "migration.case" },
            "original_event": { "event_id": "b" }
        });
        assert_eq!(recover_event(&record)["event_id"], "a");
    }

    #[test]
    fn test_falls_back_to_original_event() {
        let record = json!({
            "original_event": { "event_id": "b", "source": "security.incident" }
        });
        assert_eq!(recover_event(&record)["event_id"], "b");
    }

    #[test]
    fn test_non_object_event_key_is_not_recovered() {
        // An "event" key holding a string is not a nested event
        let record = json!({ "event": "oops", "original_event": { "event_id": "b" } });
        assert_eq!(recover_event(&record)["event_id"], "b");
    }

    #[test]
    fn test_record_itself_is_last_resort() {
        let record = json!({ "event_id": "c", "source": "survey.victimization" });
        assert_eq!(recover_event(&record)["event_id"], "c");
    }

    #[test]
    fn test_routing_key_from_source_with_fallback() {
        let event = json!({ "source": "security.incident" });
        assert_eq!(replay_routing_key(&event), "security.incident");

        let sourceless = json!({ "event_id": "x" });
        assert_eq!(replay_routing_key(&sourceless), "replay.generic");
    }
}
