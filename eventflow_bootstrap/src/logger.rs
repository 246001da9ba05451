// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logging
//!
//! Logging seam for the window between process start and steady-state
//! consumption. Broker connection retries and topology declaration happen
//! in that window; they log through this trait so the connect path can be
//! driven in tests without a live subscriber, and so every service's
//! startup chatter carries its service name.

/// Bootstrap logging abstraction.
///
/// The broker adapter takes `&dyn BootstrapLogger` instead of logging
/// directly; production wires in [`ConsoleLogger`], tests wire in
/// [`NoOpLogger`].
pub trait BootstrapLogger: Send + Sync {
    /// Fatal bootstrap errors that will cause termination.
    fn error(&self, message: &str);

    /// Non-fatal issues, like a broker that is not accepting connections
    /// yet.
    fn warn(&self, message: &str);

    /// Normal startup progress.
    fn info(&self, message: &str);

    /// Detailed diagnostics, like topology declaration.
    fn debug(&self, message: &str);
}

/// Production logger: routes bootstrap messages through `tracing` with the
/// owning service attached as a structured field.
#[derive(Clone)]
pub struct ConsoleLogger {
    service: String,
}

impl ConsoleLogger {
    /// Creates a logger stamped with the given service name
    /// (`validator`, `aggregator`, ...).
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl BootstrapLogger for ConsoleLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "bootstrap", service = %self.service, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "bootstrap", service = %self.service, "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "bootstrap", service = %self.service, "{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "bootstrap", service = %self.service, "{}", message);
    }
}

/// Silent logger for tests that exercise the connect path.
#[derive(Default)]
pub struct NoOpLogger;

impl BootstrapLogger for NoOpLogger {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}
