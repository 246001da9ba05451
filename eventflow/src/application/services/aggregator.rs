// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Aggregator Service
//!
//! Second stage: consumes every validated event from `aggregator_queue`,
//! folds it into the tumbling window, and at window close publishes one
//! `window_summary` plus one `metrics.daily` message per region to
//! `analytics_exchange`.
//!
//! ## Lazy window close
//!
//! Expiry is checked after each delivery is folded in. No deliveries means
//! no check, so a quiet broker leaves the window open indefinitely; that is
//! the chosen tradeoff for having no timer, and the audit store still has
//! every event if the window is eventually lost.
//!
//! ## Liveness over exactness
//!
//! Any processing error is logged and swallowed and the delivery is acked
//! regardless. The window buffer is process-local; a crash mid-flush loses
//! it, and metrics are recomputable from the audit store. Prefetch is 10 to
//! amortize broker round-trips while the single-threaded consumer preserves
//! in-order processing.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use eventflow_bootstrap::{CancellationToken, ConsoleLogger};
use eventflow_domain::aggregates::{AggregationWindow, Observation};
use eventflow_domain::PipelineError;

use crate::infrastructure::broker::{
    amqp_error, connect_with_retry, declare_topology, publish_json, AGGREGATOR_QUEUE,
    ANALYTICS_EXCHANGE, METRICS_ROUTING_KEY, WINDOW_SUMMARY_ROUTING_KEY,
};
use crate::infrastructure::config::{AggregatorSettings, BrokerSettings};
use crate::infrastructure::runtime::AppResult;

/// Messages fetched ahead; in-order processing is preserved either way.
const PREFETCH: u16 = 10;

/// The aggregator consumer and its process-local window.
pub struct AggregatorService {
    settings: AggregatorSettings,
    window: AggregationWindow,
    logger: ConsoleLogger,
}

impl AggregatorService {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            settings,
            window: AggregationWindow::new(),
            logger: ConsoleLogger::for_service("aggregator"),
        }
    }

    /// Runs the consumer until the token cancels, reconnecting on broker
    /// loss. The window survives reconnects; it belongs to the process,
    /// not the connection.
    pub async fn run(&mut self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        info!(window = ?self.settings.window_len, "aggregator starting");
        loop {
            let connection = match connect_with_retry(broker, &token, &self.logger).await {
                Ok(connection) => connection,
                Err(PipelineError::Cancelled(_)) => return Ok(()),
                Err(error) => return Err(error),
            };

            match self.consume(&connection, &token).await {
                Ok(()) => {
                    let _ = connection.close(200, "shutdown").await;
                    info!("aggregator stopped");
                    return Ok(());
                }
                Err(error) => {
                    warn!(error = %error, "aggregator lost its broker session, reconnecting");
                }
            }
        }
    }

    async fn consume(&mut self, connection: &Connection, token: &CancellationToken) -> AppResult<()> {
        let channel = connection.create_channel().await.map_err(amqp_error)?;
        declare_topology(&channel, &self.logger).await?;
        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(amqp_error)?;

        let mut consumer = channel
            .basic_consume(
                AGGREGATOR_QUEUE,
                "aggregator",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_error)?;

        info!(queue = AGGREGATOR_QUEUE, "aggregator waiting for events");

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

    /// Folds one delivery in and acks unconditionally; only a failed ack
    /// (a dead broker session) escapes as an error.
    async fn handle_delivery(&mut self, channel: &Channel, delivery: Delivery) -> AppResult<()> {
        if let Err(error) = self.process(channel, &delivery.data).await {
            error!(error = %error, "error aggregating event");
        }

        delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(amqp_error)
    }

    async fn process(&mut self, channel: &Channel, body: &[u8]) -> AppResult<()> {
        let event: Value = serde_json::from_slice(body)?;

        let observation = self.window.observe(
            event.get("region").and_then(Value::as_str),
            event.get("source").and_then(Value::as_str),
            event.get("event_id").and_then(Value::as_str),
        );

        if observation == Observation::Duplicate {
            debug!(
                event_id = event.get("event_id").and_then(serde_json::Value::as_str).unwrap_or("?"),
                "duplicate within window, dropped"
            );
            return Ok(());
        }

        if self
            .window
            .is_expired(Instant::now(), self.settings.window_len)
        {
            self.flush(channel).await?;
        }

        Ok(())
    }

    /// Closes the window and publishes summary first, then per-region
    /// metrics.
    async fn flush(&mut self, channel: &Channel) -> AppResult<()> {
        let Some(flush) = self.window.close() else {
            return Ok(());
        };

        let total = flush.summary.total_processed;
        let summary_body = serde_json::to_vec(&flush.summary)?;
        publish_json(
            channel,
            ANALYTICS_EXCHANGE,
            WINDOW_SUMMARY_ROUTING_KEY,
            &summary_body,
        )
        .await?;

        for metric in &flush.metrics {
            let metric_body = serde_json::to_vec(metric)?;
            publish_json(channel, ANALYTICS_EXCHANGE, METRICS_ROUTING_KEY, &metric_body).await?;
        }

        info!(
            total_processed = total,
            regions = flush.metrics.len(),
            "window closed, summary published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn service(window_secs: u64) -> AggregatorService {
        AggregatorService::new(AggregatorSettings {
            window_len: Duration::from_secs(window_secs),
        })
    }

    #[test]
    fn test_window_state_folds_deliveries() {
        let mut service = service(5);
        let event = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "region": "norte",
            "source": "security.incident"
        });

        let first = service.window.observe(
            event.get("region").and_then(Value::as_str),
            event.get("source").and_then(Value::as_str),
            event.get("event_id").and_then(Value::as_str),
        );
        assert_eq!(first, Observation::Counted);

        let second = service.window.observe(
            event.get("region").and_then(Value::as_str),
            event.get("source").and_then(Value::as_str),
            event.get("event_id").and_then(Value::as_str),
        );
        assert_eq!(second, Observation::Duplicate);
        assert_eq!(service.window.total_processed(), 1);
    }

    #[test]
    fn test_window_not_expired_before_configured_length() {
        let service = service(5);
        assert!(!service
            .window
            .is_expired(Instant::now(), service.settings.window_len));
    }
}
