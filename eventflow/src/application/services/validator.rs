// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Validator Service
//!
//! First stage of the pipeline: consumes raw events from
//! `validator_input_queue`, applies the schema registry, republishes valid
//! bodies unchanged to `processing_exchange`, and dead-letters the rest.
//!
//! ## Per-delivery state machine
//!
//! ```text
//! received → parsing → validating → (forwarded | dlq_permanent | retrying)
//!          → [retry loop] → (forwarded | dlq_exhausted) → acked
//! ```
//!
//! The only terminal state is `acked`: the broker sees exactly one
//! acknowledgement per delivery, and never a negative one. Poison input
//! (non-JSON, schema mismatch, unknown source) goes straight to the DLQ;
//! only *transient* failures (broker hiccups while republishing, or the
//! chaos hook) enter the retry loop.
//!
//! ## Retry policy
//!
//! Up to [`MAX_RETRIES`] additional attempts with exponential backoff:
//! 1 s, 2 s, 4 s. After exhaustion the cause is wrapped in a dead-letter
//! envelope with `Max retries exceeded: ...` and the delivery is acked.
//! The backoff sleeps inline; with prefetch 1 that serializes behind the
//! current message by design, and other consumer instances keep draining
//! independent deliveries.
//!
//! ## Chaos hook
//!
//! With `SIMULATE_ERRORS=true`, attempts 1 and 2 each fail with
//! probability 0.3 to exercise the retry path end-to-end.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use eventflow_bootstrap::{CancellationToken, ConsoleLogger};
use eventflow_domain::entities::EventEnvelope;
use eventflow_domain::events::DeadLetter;
use eventflow_domain::services::schema_registry::{validate_event, ValidationFailureKind};
use eventflow_domain::PipelineError;

use crate::infrastructure::broker::{
    amqp_error, connect_with_retry, declare_topology, publish_json, DLQ_EXCHANGE, DLQ_ROUTING_KEY,
    PROCESSING_EXCHANGE, VALIDATOR_INPUT_QUEUE,
};
use crate::infrastructure::config::{BrokerSettings, ValidatorSettings};
use crate::infrastructure::runtime::AppResult;

/// Service name stamped into dead-letter envelopes.
const SERVICE_NAME: &str = "validator";

/// Additional attempts after the first.
pub const MAX_RETRIES: u32 = 3;

/// Base backoff; attempt k sleeps `BASE_BACKOFF * 2^(k-1)`.
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Failure probability per chaos-eligible attempt.
const CHAOS_PROBABILITY: f64 = 0.3;

/// Attempts the chaos hook may fail (the first two).
const CHAOS_ELIGIBLE_ATTEMPTS: u32 = 2;

/// Backoff before retry `attempt` (0-based): 1 s, 2 s, 4 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.saturating_pow(attempt)
}

/// What one validation pass decided about a body.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Body is valid; republish unchanged, preserving the routing key. The
    /// typed envelope rides along for structured logging.
    Forward(Box<EventEnvelope>),
    /// Permanent failure; dead-letter with this reason.
    DeadLetter(String),
}

/// Pure classification of a delivery body: parse, then schema-check.
///
/// Transport is deliberately absent here so the decision table is testable
/// without a broker.
pub fn classify_body(body: &[u8]) -> ValidationOutcome {
    let event: Value = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(_) => return ValidationOutcome::DeadLetter("Invalid JSON".to_string()),
    };

    if let Err(failure) = validate_event(&event) {
        // The unknown-source reason already names the event type; schema
        // failures get a discriminating prefix.
        return if failure.kind == ValidationFailureKind::UnknownSource {
            ValidationOutcome::DeadLetter(failure.reason)
        } else {
            ValidationOutcome::DeadLetter(format!("Schema error: {}", failure.reason))
        };
    }

    match EventEnvelope::from_value(&event) {
        Ok(envelope) => ValidationOutcome::Forward(Box::new(envelope)),
        // Unreachable after registry validation, but the decision stays total
        Err(error) => ValidationOutcome::DeadLetter(format!("Schema error: {}", error)),
    }
}

/// Injects simulated transient failures when the chaos flag is set.
#[derive(Debug, Clone)]
pub struct ChaosInjector {
    enabled: bool,
}

impl ChaosInjector {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Fails attempts 0 and 1 with probability [`CHAOS_PROBABILITY`].
    pub fn maybe_fail(&self, attempt: u32) -> Result<(), PipelineError> {
        if self.enabled && attempt < CHAOS_ELIGIBLE_ATTEMPTS && rand::random::<f64>() < CHAOS_PROBABILITY
        {
            warn!("chaos: injected simulated network failure");
            return Err(PipelineError::broker_error(
                "simulated network failure (chaos testing)",
            ));
        }
        Ok(())
    }
}

/// The validator consumer.
pub struct ValidatorService {
    chaos: ChaosInjector,
    logger: ConsoleLogger,
}

impl ValidatorService {
    pub fn new(settings: ValidatorSettings) -> Self {
        Self {
            chaos: ChaosInjector::new(settings.simulate_errors),
            logger: ConsoleLogger::for_service(SERVICE_NAME),
        }
    }

    /// Runs the consumer until the token cancels, reconnecting on broker
    /// loss with the shared 5-second policy.
    pub async fn run(&self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        loop {
            let connection = match connect_with_retry(broker, &token, &self.logger).await {
                Ok(connection) => connection,
                Err(PipelineError::Cancelled(_)) => return Ok(()),
                Err(error) => return Err(error),
            };

            match self.consume(&connection, &token).await {
                Ok(()) => {
                    let _ = connection.close(200, "shutdown").await;
                    info!("validator stopped");
                    return Ok(());
                }
                Err(error) => {
                    warn!(error = %error, "validator lost its broker session, reconnecting");
                }
            }
        }
    }

    /// Consumes deliveries until cancellation (Ok) or broker failure (Err).
    async fn consume(&self, connection: &Connection, token: &CancellationToken) -> AppResult<()> {
        let channel = connection.create_channel().await.map_err(amqp_error)?;
        declare_topology(&channel, &self.logger).await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(amqp_error)?;

        let mut consumer = channel
            .basic_consume(
                VALIDATOR_INPUT_QUEUE,
                "validator",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_error)?;

        info!(queue = VALIDATOR_INPUT_QUEUE, "validator waiting for events");

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.handle_delivery(&channel, delivery).await?,
                    Some(Err(error)) => return Err(amqp_error(error)),
                    None => return Err(PipelineError::broker_error("consumer stream ended")),
                }
            }
        }
    }

    /// Processes one delivery to its single terminal ack.
    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) -> AppResult<()> {
        let routing_key = delivery.routing_key.as_str().to_string();
        debug!(routing_key = %routing_key, "received event");

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(channel, &routing_key, &delivery.data, attempt).await {
                Ok(()) => break,
                Err(error) if attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES + 1,
                        error = %error,
                        "transient failure, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(error = %error, "retries exhausted, dead-lettering");
                    self.send_to_dlq(
                        channel,
                        &delivery.data,
                        &format!("Max retries exceeded: {}", error),
                    )
                    .await?;
                    break;
                }
            }
        }

        // Exactly one ack per delivery; a failed ack surfaces as a broker
        // error and forces a reconnect with redelivery.
        delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(amqp_error)
    }

    /// One validation attempt: chaos hook, classify, then publish.
    async fn attempt(
        &self,
        channel: &Channel,
        routing_key: &str,
        body: &[u8],
        attempt: u32,
    ) -> AppResult<()> {
        self.chaos.maybe_fail(attempt)?;

        match classify_body(body) {
            ValidationOutcome::Forward(envelope) => {
                publish_json(channel, PROCESSING_EXCHANGE, routing_key, body).await?;
                debug!(
                    event_id = %envelope.event_id,
                    region = %envelope.region,
                    routing_key = %routing_key,
                    "valid event forwarded"
                );
                Ok(())
            }
            ValidationOutcome::DeadLetter(reason) => {
                info!(reason = %reason, "invalid event dead-lettered");
                self.send_to_dlq(channel, body, &reason).await
            }
        }
    }

    async fn send_to_dlq(&self, channel: &Channel, body: &[u8], reason: &str) -> AppResult<()> {
        let letter = DeadLetter::wrap(body, reason, SERVICE_NAME);
        let payload = serde_json::to_vec(&letter)?;
        publish_json(channel, DLQ_EXCHANGE, DLQ_ROUTING_KEY, &payload).await
    }
}
