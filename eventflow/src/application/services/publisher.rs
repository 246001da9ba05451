// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Traffic Generator
//!
//! Synthetic event source for exercising the pipeline. Its only contract
//! with the core is the envelope schema and the routing-key convention:
//! every event publishes to `events_exchange` with its `source` as the
//! routing key.
//!
//! Event mix is weighted (security incidents 50%, victimization surveys
//! 30%, migration cases 20%) at `EVENT_RATE` events per second. With
//! `ENABLE_BURST` set, each tick has a 10% chance of first emitting a
//! burst of 5–15 security incidents. A fixed `--seed` makes the stream
//! reproducible for tests and demos.

use chrono::{Local, Utc};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::{debug, info};

use eventflow_bootstrap::{CancellationToken, ConsoleLogger};
use eventflow_domain::entities::{GeoLocation, MigrationCase, SecurityIncident, VictimizationSurvey};
use eventflow_domain::value_objects::EventId;
use eventflow_domain::PipelineError;

use crate::infrastructure::broker::{
    amqp_error, connect_with_retry, declare_topology, publish_json, EVENTS_EXCHANGE,
};
use crate::infrastructure::config::{BrokerSettings, PublisherSettings};
use crate::infrastructure::runtime::AppResult;

const CRIME_TYPES: &[&str] = &["theft", "assault", "burglary", "homicide"];
const SEVERITIES: &[&str] = &["low", "medium", "high"];
const REPORTERS: &[&str] = &["citizen", "police", "app"];
const VICTIMIZATION_TYPES: &[&str] = &["theft", "assault"];
const CASE_TYPES: &[&str] = &["asylum", "visa", "residence"];
const CASE_STATUSES: &[&str] = &["pending", "approved", "rejected"];
const ORIGIN_COUNTRIES: &[&str] = &["Venezuela", "Haiti", "Peru", "Colombia"];

/// Chance of a burst per tick when bursts are enabled.
const BURST_PROBABILITY: f64 = 0.1;

fn wire_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Synthetic event generator with a deterministic seed option.
pub struct EventGenerator {
    regions: Vec<String>,
    rng: StdRng,
}

impl EventGenerator {
    pub fn new(regions: Vec<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { regions, rng }
    }

    /// Uniform pick from a non-empty option table.
    fn pick(&mut self, options: &'static [&'static str]) -> &'static str {
        options[self.rng.random_range(0..options.len())]
    }

    fn base_event(&mut self, source: &str) -> Value {
        let region = self
            .regions
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| "norte".to_string());
        json!({
            "event_id": EventId::generate().to_string(),
            "timestamp": wire_timestamp(),
            "region": region,
            "source": source,
            "schema_version": "1.0",
            "correlation_id": format!("corr-{}", self.rng.random_range(1000..=9999)),
            "payload": {}
        })
    }

    pub fn security_incident(&mut self) -> AppResult<Value> {
        let mut event = self.base_event("security.incident");
        let payload = SecurityIncident {
            crime_type: self.pick(CRIME_TYPES).to_string(),
            severity: self.pick(SEVERITIES).to_string(),
            location: GeoLocation {
                latitude: round4(self.rng.random_range(-55.0..-17.0)),
                longitude: round4(self.rng.random_range(-75.0..-66.0)),
            },
            reported_by: self.pick(REPORTERS).to_string(),
        };
        event["payload"] = serde_json::to_value(&payload)?;
        Ok(event)
    }

    pub fn victimization_survey(&mut self) -> AppResult<Value> {
        let mut event = self.base_event("survey.victimization");
        let payload = VictimizationSurvey {
            survey_id: format!("srv-{}", self.rng.random_range(10_000..=99_999)),
            respondent_age: self.rng.random_range(18..=90),
            victimization_type: self.pick(VICTIMIZATION_TYPES).to_string(),
            reported: self.rng.random_bool(0.5),
        };
        let mut payload = serde_json::to_value(&payload)?;
        payload["incident_date"] = json!(Local::now().date_naive().to_string());
        event["payload"] = payload;
        Ok(event)
    }

    pub fn migration_case(&mut self) -> AppResult<Value> {
        let mut event = self.base_event("migration.case");
        let payload = MigrationCase {
            case_id: format!("mig-{}", self.rng.random_range(10_000..=99_999)),
            case_type: self.pick(CASE_TYPES).to_string(),
            status: self.pick(CASE_STATUSES).to_string(),
            origin_country: self.pick(ORIGIN_COUNTRIES).to_string(),
        };
        let mut payload = serde_json::to_value(&payload)?;
        payload["application_date"] = json!(Local::now().date_naive().to_string());
        event["payload"] = payload;
        Ok(event)
    }

    /// Weighted draw: incidents 0.5, surveys 0.3, migrations 0.2.
    pub fn next_event(&mut self) -> AppResult<Value> {
        let roll: f64 = self.rng.random();
        if roll < 0.5 {
            self.security_incident()
        } else if roll < 0.8 {
            self.victimization_survey()
        } else {
            self.migration_case()
        }
    }

    pub fn roll_burst(&mut self) -> Option<u32> {
        if self.rng.random::<f64>() < BURST_PROBABILITY {
            Some(self.rng.random_range(5..=15))
        } else {
            None
        }
    }
}

/// The traffic generator loop.
pub struct PublisherService {
    settings: PublisherSettings,
    generator: EventGenerator,
}

impl PublisherService {
    pub fn new(settings: PublisherSettings, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            info!(seed = seed, "using fixed random seed");
        }
        let generator = EventGenerator::new(settings.regions.clone(), seed);
        Self { settings, generator }
    }

    /// Publishes events at the configured rate until the token cancels.
    pub async fn run(&mut self, broker: &BrokerSettings, token: CancellationToken) -> AppResult<()> {
        let logger = ConsoleLogger::for_service("publisher");
        let connection = match connect_with_retry(broker, &token, &logger).await {
            Ok(connection) => connection,
            Err(PipelineError::Cancelled(_)) => return Ok(()),
            Err(error) => return Err(error),
        };
        let channel = connection.create_channel().await.map_err(amqp_error)?;
        declare_topology(&channel, &logger).await?;

        let delay = self.settings.publish_delay();
        info!(
            rate = self.settings.event_rate,
            burst = self.settings.enable_burst,
            "publisher started"
        );

        loop {
            if token.is_cancelled() {
                break;
            }

            if self.settings.enable_burst {
                if let Some(size) = self.generator.roll_burst() {
                    info!(size = size, "burst started");
                    for _ in 0..size {
                        let event = self.generator.security_incident()?;
                        publish_event(&channel, &event).await?;
                    }
                }
            }

            let event = self.generator.next_event()?;
            publish_event(&channel, &event).await?;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = connection.close(200, "shutdown").await;
        info!("publisher stopped");
        Ok(())
    }
}

async fn publish_event(channel: &lapin::Channel, event: &Value) -> AppResult<()> {
    let routing_key = event
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let body = serde_json::to_vec(event)?;
    publish_json(channel, EVENTS_EXCHANGE, routing_key, &body).await?;
    debug!(
        routing_key = routing_key,
        event_id = event.get("event_id").and_then(serde_json::Value::as_str).unwrap_or("?"),
        "event published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_domain::services::schema_registry::validate_event;

    fn generator() -> EventGenerator {
        EventGenerator::new(
            vec!["norte".to_string(), "sur".to_string()],
            Some(42),
        )
    }

    #[test]
    fn test_generated_events_pass_validation() {
        let mut generator = generator();
        for _ in 0..64 {
            let event = generator.next_event().unwrap();
            assert!(
                validate_event(&event).is_ok(),
                "generated event failed validation: {}",
                event
            );
        }
    }

    #[test]
    fn test_seeded_streams_are_reproducible() {
        // event_id stays a fresh UUID per event; everything the RNG drives
        // (source choice, region, payload) must repeat under the same seed
        let mut a = generator();
        let mut b = generator();
        for _ in 0..16 {
            let left = a.next_event().unwrap();
            let right = b.next_event().unwrap();
            assert_eq!(left["source"], right["source"]);
            assert_eq!(left["region"], right["region"]);
            assert_eq!(left["payload"], right["payload"]);
        }
    }

    #[test]
    fn test_event_mix_covers_all_sources() {
        let mut generator = generator();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..256 {
            let event = generator.next_event().unwrap();
            seen.insert(event["source"].as_str().unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_coordinates_stay_in_range() {
        let mut generator = generator();
        for _ in 0..64 {
            let event = generator.security_incident().unwrap();
            let lat = event["payload"]["location"]["latitude"].as_f64().unwrap();
            let lon = event["payload"]["location"]["longitude"].as_f64().unwrap();
            assert!((-55.0..=-17.0).contains(&lat));
            assert!((-75.0..=-66.0).contains(&lon));
        }
    }
}
