// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! Maps OS termination signals onto the shutdown coordinator. SIGINT and
//! SIGTERM both initiate graceful shutdown; the consumer loops observe the
//! cancellation token, stop pulling deliveries, and close their broker
//! connections. A clean, signal-driven exit reports exit code 0.

use crate::shutdown::ShutdownCoordinator;

/// Installs the signal listener for the lifetime of the process.
///
/// Spawns a background task that waits for SIGINT (Ctrl+C) or, on Unix,
/// SIGTERM, and initiates shutdown on the coordinator when one arrives.
/// Subsequent signals are ignored; the first one wins.
pub fn install_signal_handler(coordinator: ShutdownCoordinator) {
    tokio::spawn(async move {
        wait_for_termination_signal().await;
        coordinator.initiate_shutdown();
    });
}

/// Waits until the process receives a termination signal.
#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!("failed to install SIGTERM handler: {}", error);
            // Fall back to Ctrl+C only
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::error!("failed to listen for SIGINT: {}", error);
            } else {
                tracing::info!("received SIGINT");
            }
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {}", error);
    } else {
        tracing::info!("received Ctrl+C");
    }
}
