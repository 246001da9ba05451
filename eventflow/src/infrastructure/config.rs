// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Service Configuration
//!
//! Typed settings for every service binary, populated from environment
//! variables. Each service reads only its own settings struct; defaults
//! match the deployment contract:
//!
//! | Variable | Default | Used by |
//! |---|---|---|
//! | `RABBITMQ_HOST` | `localhost` | all |
//! | `RABBITMQ_PORT` | `5672` | all |
//! | `SIMULATE_ERRORS` | unset | validator |
//! | `AGGREGATION_WINDOW` | `5.0` (seconds) | aggregator |
//! | `AUDIT_DB_PATH` | `/data/audit.db` | audit |
//! | `LOG_FILE_PATH` | `/data/audit_log.jsonl` | audit, replay |
//! | `WEB_PORT` | `5000` | dashboard |
//! | `EVENT_RATE` | `1.0` (events/second) | publisher |
//! | `ENABLE_BURST` | `false` | publisher |
//! | `REGIONS` | the five-region enum | publisher |
//!
//! Malformed numeric values are configuration errors, not silent defaults:
//! a deployment that sets `AGGREGATION_WINDOW=fast` should fail at startup,
//! not aggregate on a window it never asked for.

use std::time::Duration;

use eventflow_domain::value_objects::Region;
use eventflow_domain::PipelineError;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, PipelineError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            PipelineError::invalid_config(format!("{} has invalid value '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|raw| raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Broker connection settings shared by every service.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
}

impl BrokerSettings {
    pub fn from_env() -> Result<Self, PipelineError> {
        Ok(Self {
            host: env_string("RABBITMQ_HOST", "localhost"),
            port: env_parse("RABBITMQ_PORT", 5672)?,
        })
    }

    /// AMQP URI for the default vhost.
    pub fn amqp_uri(&self) -> String {
        format!("amqp://{}:{}/%2f", self.host, self.port)
    }
}

/// Validator-specific settings.
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Chaos hook: inject simulated transient failures on early attempts.
    pub simulate_errors: bool,
}

impl ValidatorSettings {
    pub fn from_env() -> Self {
        Self {
            simulate_errors: env_flag("SIMULATE_ERRORS"),
        }
    }
}

/// Aggregator-specific settings.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Tumbling window length.
    pub window_len: Duration,
}

impl AggregatorSettings {
    pub fn from_env() -> Result<Self, PipelineError> {
        let seconds: f64 = env_parse("AGGREGATION_WINDOW", 5.0)?;
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(PipelineError::invalid_config(format!(
                "AGGREGATION_WINDOW must be a positive number of seconds, got {}",
                seconds
            )));
        }
        Ok(Self {
            window_len: Duration::from_secs_f64(seconds),
        })
    }
}

/// Audit-specific settings.
#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// SQLite database file for events, metrics, and lineage.
    pub db_path: String,
    /// Best-effort JSON-Lines journal the replay reader consumes.
    pub log_file_path: String,
}

impl AuditSettings {
    pub fn from_env() -> Self {
        Self {
            db_path: env_string("AUDIT_DB_PATH", "/data/audit.db"),
            log_file_path: env_string("LOG_FILE_PATH", "/data/audit_log.jsonl"),
        }
    }
}

/// Replay reads the same journal the audit service writes.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub log_file_path: String,
}

impl ReplaySettings {
    pub fn from_env() -> Self {
        Self {
            log_file_path: env_string("LOG_FILE_PATH", "/data/audit_log.jsonl"),
        }
    }
}

/// Dashboard-specific settings.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub web_port: u16,
}

impl DashboardSettings {
    pub fn from_env() -> Result<Self, PipelineError> {
        Ok(Self {
            web_port: env_parse("WEB_PORT", 5000)?,
        })
    }
}

/// Traffic generator settings.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Events per second.
    pub event_rate: f64,
    /// Occasionally emit a burst of security incidents.
    pub enable_burst: bool,
    /// Regions to draw from; defaults to the full five-region enum.
    pub regions: Vec<String>,
}

impl PublisherSettings {
    pub fn from_env() -> Result<Self, PipelineError> {
        let event_rate: f64 = env_parse("EVENT_RATE", 1.0)?;
        if !event_rate.is_finite() || event_rate <= 0.0 {
            return Err(PipelineError::invalid_config(format!(
                "EVENT_RATE must be a positive number of events per second, got {}",
                event_rate
            )));
        }

        let regions: Vec<String> = match std::env::var("REGIONS") {
            Ok(raw) => raw
                .split(',')
                .map(|region| region.trim().to_string())
                .filter(|region| !region.is_empty())
                .collect(),
            Err(_) => Region::ALL.iter().map(|r| r.as_str().to_string()).collect(),
        };
        if regions.is_empty() {
            return Err(PipelineError::invalid_config("REGIONS must name at least one region"));
        }

        Ok(Self {
            event_rate,
            enable_burst: env_flag("ENABLE_BURST"),
            regions,
        })
    }

    /// Delay between events at the configured rate.
    pub fn publish_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.event_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_uri_shape() {
        let settings = BrokerSettings {
            host: "rabbit.internal".to_string(),
            port: 5673,
        };
        assert_eq!(settings.amqp_uri(), "amqp://rabbit.internal:5673/%2f");
    }

    #[test]
    fn test_publish_delay_from_rate() {
        let settings = PublisherSettings {
            event_rate: 4.0,
            enable_burst: false,
            regions: vec!["norte".to_string()],
        };
        assert_eq!(settings.publish_delay(), Duration::from_millis(250));
    }
}
