// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Dashboard Service
//!
//! Read-only consumer of window summaries with a trivial contract: hold
//! the latest snapshot, serve it over HTTP. Two concurrent actors (the
//! broker consumer and the HTTP responder) share the snapshot through a
//! watch channel: single writer, last writer wins, readers always see an
//! atomically replaced reference.
//!
//! The consumer uses an anonymous **exclusive** queue bound with `#` to
//! `analytics_exchange` and auto-acks. On dashboard restart, summaries
//! published while it was down are lost by design; the dashboard shows the
//! present, not history.

use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use eventflow_bootstrap::{BootstrapLogger, CancellationToken, ConsoleLogger};
use eventflow_domain::PipelineError;

use crate::infrastructure::broker::{
    amqp_error, connect_with_retry, declare_topology, ANALYTICS_EXCHANGE,
};
use crate::infrastructure::config::{BrokerSettings, DashboardSettings};
use crate::infrastructure::http::{waiting_snapshot, DashboardEndpoint};
use crate::infrastructure::runtime::{join_supervised, spawn_supervised, AppResult};

/// The dashboard process: snapshot consumer plus HTTP endpoint.
pub struct DashboardService {
    settings: DashboardSettings,
}

impl DashboardService {
    pub fn new(settings: DashboardSettings) -> Self {
        Self { settings }
    }

    /// Runs consumer and HTTP endpoint until the token cancels.
    pub async fn run(&self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(waiting_snapshot()));

        let consumer = {
            let broker = broker.clone();
            let token = token.clone();
            spawn_supervised("dashboard-consumer", async move {
                consumer_loop(&broker, snapshot_tx, token).await
            })
        };

        let endpoint = DashboardEndpoint::new(snapshot_rx, self.settings.web_port);
        let http = {
            let token = token.clone();
            spawn_supervised("dashboard-http", async move { endpoint.serve(token).await })
        };

        let consumer_result = join_supervised(consumer).await;
        let http_result = join_supervised(http).await;
        consumer_result.and(http_result)
    }
}

/// Consumes summaries into the snapshot until the token cancels.
async fn consumer_loop(
    broker: &BrokerSettings,
    snapshot: watch::Sender<Arc<Value>>,
    token: CancellationToken,
) -> AppResult<()> {
    let logger = ConsoleLogger::for_service("dashboard");
    loop {
        let connection = match connect_with_retry(broker, &token, &logger).await {
            Ok(connection) => connection,
            Err(PipelineError::Cancelled(_)) => return Ok(()),
            Err(error) => return Err(error),
        };

        match consume(&connection, &snapshot, &token, &logger).await {
            Ok(()) => {
                let _ = connection.close(200, "shutdown").await;
                info!("dashboard consumer stopped");
                return Ok(());
            }
            Err(error) => {
                warn!(error = %error, "dashboard lost its broker session, reconnecting");
            }
        }
    }
}

async fn consume(
    connection: &Connection,
    snapshot: &watch::Sender<Arc<Value>>,
    token: &CancellationToken,
    logger: &dyn BootstrapLogger,
) -> AppResult<()> {
    let channel = connection.create_channel().await.map_err(amqp_error)?;
    declare_topology(&channel, logger).await?;

    // Anonymous exclusive queue: gone with this consumer, by design
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(amqp_error)?;
    channel
        .queue_bind(
            queue.name().as_str(),
            ANALYTICS_EXCHANGE,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(amqp_error)?;

    let mut consumer = channel
        .basic_consume(
            queue.name().as_str(),
            "dashboard",
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(amqp_error)?;

    info!("dashboard listening for window summaries");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => {
                    match serde_json::from_slice::<Value>(&delivery.data) {
                        Ok(summary) => {
                            debug!("dashboard updated with new window");
                            // Receivers may all be gone during shutdown; ignore
                            let _ = snapshot.send(Arc::new(summary));
                        }
                        Err(error) => warn!(error = %error, "undecodable summary ignored"),
                    }
                }
                Some(Err(error)) => return Err(amqp_error(error)),
                None => return Err(PipelineError::broker_error("consumer stream ended")),
            }
        }
    }
}
