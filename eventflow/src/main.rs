// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # EventFlow CLI
//!
//! Single binary, one subcommand per service. Each service is a
//! long-running consumer (replay runs once and exits); all of them share
//! the same lifecycle: install tracing, read settings from the
//! environment, wire the shutdown coordinator to SIGINT/SIGTERM, run until
//! cancelled, exit 0 on a clean shutdown and 1 on an unrecoverable error.
//!
//! ```bash
//! eventflow validator            # schema validation + DLQ routing
//! eventflow aggregator           # tumbling-window aggregation
//! eventflow audit                # SQLite audit sink with lineage
//! eventflow dashboard            # latest-window snapshot over HTTP
//! eventflow replay               # re-inject the audit journal
//! eventflow publish --seed 42    # reproducible synthetic traffic
//! ```

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eventflow::application::services::{
    AggregatorService, AuditService, DashboardService, PublisherService, ReplayService,
    ValidatorService,
};
use eventflow::infrastructure::config::{
    AggregatorSettings, AuditSettings, BrokerSettings, DashboardSettings, PublisherSettings,
    ReplaySettings, ValidatorSettings,
};
use eventflow::infrastructure::journal::AuditJournal;
use eventflow::infrastructure::repositories::SqliteAuditRepository;
use eventflow::infrastructure::runtime::AppResult;
use eventflow_bootstrap::{install_signal_handler, ExitCode, ShutdownCoordinator};
use eventflow_domain::PipelineError;

#[derive(Parser)]
#[command(name = "eventflow")]
#[command(about = "Distributed event-processing pipeline services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate raw events and route rejects to the DLQ
    Validator,
    /// Aggregate validated events in tumbling windows
    Aggregator,
    /// Persist events, metrics, and lineage to SQLite
    Audit,
    /// Serve the latest window snapshot over HTTP
    Dashboard,
    /// Re-inject the audit journal into the input exchange
    Replay,
    /// Generate synthetic traffic
    Publish {
        /// Fixed random seed for reproducible streams
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_service(command: Commands, coordinator: &ShutdownCoordinator) -> AppResult<()> {
    let broker = BrokerSettings::from_env()?;
    let token = coordinator.token();

    match command {
        Commands::Validator => {
            let service = ValidatorService::new(ValidatorSettings::from_env());
            service.run(&broker, token).await
        }
        Commands::Aggregator => {
            let mut service = AggregatorService::new(AggregatorSettings::from_env()?);
            service.run(&broker, token).await
        }
        Commands::Audit => {
            let settings = AuditSettings::from_env();
            let repository = Arc::new(SqliteAuditRepository::connect(&settings.db_path).await?);
            let journal = AuditJournal::new(&settings.log_file_path);
            let service = AuditService::new(repository, journal);
            service.run(&broker, token).await
        }
        Commands::Dashboard => {
            let service = DashboardService::new(DashboardSettings::from_env()?);
            service.run(&broker, token).await
        }
        Commands::Replay => {
            let service = ReplayService::new(ReplaySettings::from_env());
            service.run(&broker, token).await
        }
        Commands::Publish { seed } => {
            let mut service = PublisherService::new(PublisherSettings::from_env()?, seed);
            service.run(&broker, token).await
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let coordinator = ShutdownCoordinator::default();
    install_signal_handler(coordinator.clone());

    let result = run_service(cli.command, &coordinator).await;
    coordinator.complete_shutdown();

    match result {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::Success.into()
        }
        Err(PipelineError::Cancelled(_)) => {
            info!("cancelled, shutting down");
            ExitCode::Success.into()
        }
        Err(error) => {
            error!(error = %error, "service failed");
            ExitCode::Failure.into()
        }
    }
}
