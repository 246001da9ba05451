// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Broker Adapter
//!
//! Thin adapter over `lapin` for the pipeline's AMQP topology: connection
//! establishment with constant-delay retry, idempotent topology
//! declaration, and persistent JSON publishing.
//!
//! ## Topology
//!
//! | Exchange | Type | Role |
//! |---|---|---|
//! | `events_exchange` | topic | Raw input from publisher / replay |
//! | `processing_exchange` | topic | Validated events |
//! | `analytics_exchange` | topic | Aggregated outputs |
//! | `dlq_exchange` | direct | Poison messages |
//!
//! Every service declares the full topology on connect. Declaration is
//! idempotent at the broker, so startup order between services does not
//! matter; whichever connects first creates the exchanges and queues, the
//! rest re-assert them.
//!
//! ## Connection policy
//!
//! On start and after broker loss: retry every 5 seconds until the broker
//! accepts the connection or the cancellation token fires. Consumer loops
//! call [`connect_with_retry`] from their outer reconnect loop, so a
//! dropped connection heals without operator action.

use lapin::options::{
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::time::Duration;

use eventflow_bootstrap::{BootstrapLogger, CancellationToken};
use eventflow_domain::PipelineError;

use crate::infrastructure::config::BrokerSettings;

/// Raw input exchange fed by the publisher and the replay reader.
pub const EVENTS_EXCHANGE: &str = "events_exchange";
/// Validated events, republished by the validator.
pub const PROCESSING_EXCHANGE: &str = "processing_exchange";
/// Aggregated outputs: window summaries and per-region metrics.
pub const ANALYTICS_EXCHANGE: &str = "analytics_exchange";
/// Poison messages the pipeline gave up on.
pub const DLQ_EXCHANGE: &str = "dlq_exchange";

/// Validator input, bound to the three recognized routing keys.
pub const VALIDATOR_INPUT_QUEUE: &str = "validator_input_queue";
/// Aggregator input, bound to everything on `processing_exchange`.
pub const AGGREGATOR_QUEUE: &str = "aggregator_queue";
/// Audit event writer input, bound to everything on `processing_exchange`.
pub const AUDIT_QUEUE: &str = "audit_queue";
/// Audit metric writer input, bound to the metrics routing key.
pub const AUDIT_METRICS_QUEUE: &str = "audit_metrics_queue";

/// Routing key for dead-lettered validation failures.
pub const DLQ_ROUTING_KEY: &str = "deadletter.validation";
/// Routing key for window summaries.
pub const WINDOW_SUMMARY_ROUTING_KEY: &str = "analytics.window";
/// Routing key for per-region daily metrics.
pub const METRICS_ROUTING_KEY: &str = "metrics.daily";
/// Routing key for replayed records whose source cannot be recovered.
pub const REPLAY_FALLBACK_ROUTING_KEY: &str = "replay.generic";

/// Topics the validator listens on.
pub const LISTEN_TOPICS: &[&str] = &[
    "security.incident",
    "survey.victimization",
    "migration.case",
];

/// Constant delay between connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Maps a lapin transport error into the pipeline's error taxonomy.
pub fn amqp_error(error: lapin::Error) -> PipelineError {
    PipelineError::broker_error(error.to_string())
}

/// Connects to the broker, retrying every [`RECONNECT_DELAY`] until it
/// succeeds or the token cancels.
///
/// Runs before steady-state consumption, so progress goes through the
/// bootstrap logging seam rather than assuming a tracing subscriber.
pub async fn connect_with_retry(
    settings: &BrokerSettings,
    token: &CancellationToken,
    logger: &dyn BootstrapLogger,
) -> Result<Connection, PipelineError> {
    let uri = settings.amqp_uri();
    loop {
        if token.is_cancelled() {
            return Err(PipelineError::cancelled());
        }

        match Connection::connect(&uri, ConnectionProperties::default()).await {
            Ok(connection) => {
                logger.info(&format!(
                    "connected to broker at {}:{}",
                    settings.host, settings.port
                ));
                return Ok(connection);
            }
            Err(error) => {
                logger.warn(&format!(
                    "broker not ready at {} ({}), retrying in {:?}",
                    settings.host, error, RECONNECT_DELAY
                ));
            }
        }

        tokio::select! {
            _ = token.cancelled() => return Err(PipelineError::cancelled()),
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// Declares the full exchange/queue topology idempotently.
pub async fn declare_topology(
    channel: &Channel,
    logger: &dyn BootstrapLogger,
) -> Result<(), PipelineError> {
    let durable = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };

    for exchange in [EVENTS_EXCHANGE, PROCESSING_EXCHANGE, ANALYTICS_EXCHANGE] {
        channel
            .exchange_declare(exchange, ExchangeKind::Topic, durable, FieldTable::default())
            .await
            .map_err(amqp_error)?;
    }
    channel
        .exchange_declare(DLQ_EXCHANGE, ExchangeKind::Direct, durable, FieldTable::default())
        .await
        .map_err(amqp_error)?;

    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };

    channel
        .queue_declare(VALIDATOR_INPUT_QUEUE, durable_queue, FieldTable::default())
        .await
        .map_err(amqp_error)?;
    for topic in LISTEN_TOPICS {
        channel
            .queue_bind(
                VALIDATOR_INPUT_QUEUE,
                EVENTS_EXCHANGE,
                topic,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_error)?;
    }

    for (queue, exchange, routing_key) in [
        (AGGREGATOR_QUEUE, PROCESSING_EXCHANGE, "#"),
        (AUDIT_QUEUE, PROCESSING_EXCHANGE, "#"),
        (AUDIT_METRICS_QUEUE, ANALYTICS_EXCHANGE, METRICS_ROUTING_KEY),
    ] {
        channel
            .queue_declare(queue, durable_queue, FieldTable::default())
            .await
            .map_err(amqp_error)?;
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_error)?;
    }

    logger.debug("broker topology declared");
    Ok(())
}

/// Persistent-delivery properties for JSON payloads.
fn persistent_json() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type("application/json".into())
}

/// Publishes a persistent JSON message.
pub async fn publish_json(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    body: &[u8],
) -> Result<(), PipelineError> {
    channel
        .basic_publish(
            exchange,
            routing_key,
            lapin::options::BasicPublishOptions::default(),
            body,
            persistent_json(),
        )
        .await
        .map_err(amqp_error)?
        .await
        .map_err(amqp_error)?;
    Ok(())
}

/// Publishes a persistent JSON message with extra headers.
pub async fn publish_json_with_headers(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    body: &[u8],
    headers: FieldTable,
) -> Result<(), PipelineError> {
    channel
        .basic_publish(
            exchange,
            routing_key,
            lapin::options::BasicPublishOptions::default(),
            body,
            persistent_json().with_headers(headers),
        )
        .await
        .map_err(amqp_error)?
        .await
        .map_err(amqp_error)?;
    Ok(())
}

/// Header marking a replayed event.
pub fn replay_headers() -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert("x-replay".into(), AMQPValue::LongString("true".into()));
    headers
}

/// Reads a string header from delivery properties, if present.
pub fn header_string(properties: &BasicProperties, name: &str) -> Option<String> {
    properties
        .headers()
        .as_ref()
        .and_then(|table| table.inner().get(name))
        .and_then(|value| match value {
            AMQPValue::LongString(s) => Some(s.to_string()),
            AMQPValue::ShortString(s) => Some(s.to_string()),
            _ => None,
        })
}
