// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Service
//!
//! Transactional sink for the whole pipeline: one process running two
//! independent consumers.
//!
//! - The **event writer** on `audit_queue` persists every validated event
//!   into `events_in` and appends a best-effort JSON-Lines journal record.
//! - The **metric writer** on `audit_metrics_queue` persists every emitted
//!   metric into `metrics_out` together with its event→metric lineage
//!   trace, atomically.
//!
//! ## Ack/nack taxonomy
//!
//! | Outcome | Action |
//! |---|---|
//! | Parsed and stored | ack |
//! | JSON decode failure | ack (poison, drop) |
//! | Missing required field | ack (poison, drop) |
//! | Database error | nack, requeue |
//! | Lineage race (FK violation) | nack, requeue |
//!
//! The lineage race is the interesting one: events and metrics flow through
//! independent queues, so a metric can arrive before every event it
//! references. The foreign key rejects it, the transaction rolls back, and
//! the requeued delivery succeeds once the event writer catches up.
//!
//! ## run_id resolution
//!
//! Broker message header `run_id`, then the payload field, then the
//! literal `"default"`.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use eventflow_bootstrap::{CancellationToken, ConsoleLogger};
use eventflow_domain::events::RegionMetric;
use eventflow_domain::repositories::{AuditRepository, EventRecord};
use eventflow_domain::PipelineError;

use crate::infrastructure::broker::{
    amqp_error, connect_with_retry, declare_topology, header_string, AUDIT_METRICS_QUEUE,
    AUDIT_QUEUE,
};
use crate::infrastructure::config::BrokerSettings;
use crate::infrastructure::journal::AuditJournal;
use crate::infrastructure::runtime::{join_supervised, spawn_supervised, AppResult};

/// Fallback run identifier.
const DEFAULT_RUN_ID: &str = "default";

/// How a processed delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with this delivery, successfully or as dropped poison.
    Ack,
    /// Transient storage failure; let the broker redeliver.
    NackRequeue,
}

/// Resolves the effective run id: header over payload over default.
pub fn resolve_run_id(properties: &BasicProperties, payload: &Value) -> String {
    header_string(properties, "run_id")
        .or_else(|| {
            payload
                .get("run_id")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| DEFAULT_RUN_ID.to_string())
}

/// The audit process: two writers sharing one repository.
pub struct AuditService<R: AuditRepository + 'static> {
    repository: Arc<R>,
    journal: AuditJournal,
    logger: ConsoleLogger,
}

impl<R: AuditRepository + 'static> AuditService<R> {
    pub fn new(repository: Arc<R>, journal: AuditJournal) -> Self {
        Self {
            repository,
            journal,
            logger: ConsoleLogger::for_service("audit"),
        }
    }

    /// Runs both writers until the token cancels; each maintains its own
    /// broker session and reconnect loop.
    pub async fn run(&self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        let event_writer = {
            let service = self.clone_parts();
            let broker = broker.clone();
            let token = token.clone();
            spawn_supervised("audit-event-writer", async move {
                service.event_writer_loop(&broker, token).await
            })
        };

        let metric_writer = {
            let service = self.clone_parts();
            let broker = broker.clone();
            let token = token.clone();
            spawn_supervised("audit-metric-writer", async move {
                service.metric_writer_loop(&broker, token).await
            })
        };

        let event_result = join_supervised(event_writer).await;
        let metric_result = join_supervised(metric_writer).await;
        event_result.and(metric_result)
    }

    fn clone_parts(&self) -> AuditWorker<R> {
        AuditWorker {
            repository: Arc::clone(&self.repository),
            journal: self.journal.clone(),
            logger: self.logger.clone(),
        }
    }

    /// Classifies one event delivery; exposed for tests.
    pub async fn ingest_event(&self, properties: &BasicProperties, body: &[u8]) -> Disposition {
        self.clone_parts().ingest_event(properties, body).await
    }

    /// Classifies one metric delivery; exposed for tests.
    pub async fn ingest_metric(&self, properties: &BasicProperties, body: &[u8]) -> Disposition {
        self.clone_parts().ingest_metric(properties, body).await
    }
}

/// The per-task view of the audit service.
struct AuditWorker<R: AuditRepository + 'static> {
    repository: Arc<R>,
    journal: AuditJournal,
    logger: ConsoleLogger,
}

impl<R: AuditRepository + 'static> AuditWorker<R> {
    async fn event_writer_loop(&self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        loop {
            let connection = match connect_with_retry(broker, &token, &self.logger).await {
                Ok(connection) => connection,
                Err(PipelineError::Cancelled(_)) => return Ok(()),
                Err(error) => return Err(error),
            };

            match self
                .consume(&connection, &token, AUDIT_QUEUE, "audit-events", WriterKind::Event)
                .await
            {
                Ok(()) => {
                    let _ = connection.close(200, "shutdown").await;
                    info!("audit event writer stopped");
                    return Ok(());
                }
                Err(error) => {
                    warn!(error = %error, "audit event writer lost its broker session, reconnecting");
                }
            }
        }
    }

    async fn metric_writer_loop(&self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        loop {
            let connection = match connect_with_retry(broker, &token, &self.logger).await {
                Ok(connection) => connection,
                Err(PipelineError::Cancelled(_)) => return Ok(()),
                Err(error) => return Err(error),
            };

            match self
                .consume(
                    &connection,
                    &token,
                    AUDIT_METRICS_QUEUE,
                    "audit-metrics",
                    WriterKind::Metric,
                )
                .await
            {
                Ok(()) => {
                    let _ = connection.close(200, "shutdown").await;
                    info!("audit metric writer stopped");
                    return Ok(());
                }
                Err(error) => {
                    warn!(error = %error, "audit metric writer lost its broker session, reconnecting");
                }
            }
        }
    }

    async fn consume(
        &self,
        connection: &Connection,
        token: &CancellationToken,
        queue: &str,
        consumer_tag: &str,
        kind: WriterKind,
    ) -> AppResult<()> {
        let channel = connection.create_channel().await.map_err(amqp_error)?;
        declare_topology(&channel, &self.logger).await?;
        // Prefetch 1 bounds in-flight work on both writers
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(amqp_error)?;

        let mut consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_error)?;

        info!(queue = queue, "audit writer waiting for messages");

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.settle(delivery, kind).await?,
                    Some(Err(error)) => return Err(amqp_error(error)),
                    None => return Err(PipelineError::broker_error("consumer stream ended")),
                }
            }
        }
    }

    async fn settle(&self, delivery: Delivery, kind: WriterKind) -> AppResult<()> {
        let disposition = match kind {
            WriterKind::Event => self.ingest_event(&delivery.properties, &delivery.data).await,
            WriterKind::Metric => self.ingest_metric(&delivery.properties, &delivery.data).await,
        };

        match disposition {
            Disposition::Ack => delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(amqp_error),
            Disposition::NackRequeue => delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
                .map_err(amqp_error),
        }
    }

    async fn ingest_event(&self, properties: &BasicProperties, body: &[u8]) -> Disposition {
        let event: Value = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(error) => {
                warn!(error = %error, "undecodable event dropped");
                return Disposition::Ack;
            }
        };

        let run_id = resolve_run_id(properties, &event);
        let record = match EventRecord::from_value(&event, run_id) {
            Ok(record) => record,
            Err(error) => {
                warn!(error = %error, "incomplete event dropped");
                return Disposition::Ack;
            }
        };

        match self.repository.record_event(&record).await {
            Ok(_inserted) => {
                // Journal failures never block the database path
                if let Err(error) = self.journal.append(&event).await {
                    warn!(error = %error, "journal append failed");
                }
                debug!(event_id = %record.event_id, "event audited");
                Disposition::Ack
            }
            Err(error) => {
                error!(error = %error, event_id = %record.event_id, "event store failed");
                Disposition::NackRequeue
            }
        }
    }

    async fn ingest_metric(&self, properties: &BasicProperties, body: &[u8]) -> Disposition {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(error) => {
                warn!(error = %error, "undecodable metric dropped");
                return Disposition::Ack;
            }
        };

        let metric: RegionMetric = match serde_json::from_value(value.clone()) {
            Ok(metric) => metric,
            Err(error) => {
                warn!(error = %error, "incomplete metric dropped");
                return Disposition::Ack;
            }
        };

        let run_id = resolve_run_id(properties, &value);

        match self.repository.record_metric(&metric, &run_id).await {
            Ok(()) => {
                debug!(metric_id = %metric.metric_id, "metric audited");
                Disposition::Ack
            }
            Err(PipelineError::LineageViolation(message)) => {
                warn!(
                    metric_id = %metric.metric_id,
                    message = %message,
                    "metric references unaudited events, requeueing"
                );
                Disposition::NackRequeue
            }
            Err(error) => {
                error!(error = %error, metric_id = %metric.metric_id, "metric store failed");
                Disposition::NackRequeue
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WriterKind {
    Event,
    Metric,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::AMQPValue;
    use serde_json::json;

    #[test]
    fn test_run_id_header_beats_payload() {
        let mut headers = FieldTable::default();
        headers.insert("run_id".into(), AMQPValue::LongString("run-header".into()));
        let properties = BasicProperties::default().with_headers(headers);
        let payload = json!({ "run_id": "run-payload" });

        assert_eq!(resolve_run_id(&properties, &payload), "run-header");
    }

    #[test]
    fn test_run_id_payload_beats_default() {
        let properties = BasicProperties::default();
        let payload = json!({ "run_id": "run-payload" });
        assert_eq!(resolve_run_id(&properties, &payload), "run-payload");
    }

    #[test]
    fn test_run_id_falls_back_to_default() {
        let properties = BasicProperties::default();
        let payload = json!({});
        assert_eq!(resolve_run_id(&properties, &payload), "default");
    }
}
