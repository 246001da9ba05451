// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Error Types
//!
//! This module provides the unified error type for the eventflow processing
//! pipeline. Every stage (validation, aggregation, audit, replay) reports
//! failures through [`PipelineError`]; errors never cross a component
//! boundary as raw exceptions, they are materialized as dead-letter messages
//! or broker negative acknowledgements at the edges.
//!
//! ## Error Taxonomy
//!
//! The variants are organized by *intent*, not by the library that produced
//! them:
//!
//! - **Poison input**: [`PipelineError::ValidationError`] and
//!   [`PipelineError::SerializationError`]. The message can never succeed on
//!   retry because its content is malformed.
//! - **Transient**: [`PipelineError::BrokerError`],
//!   [`PipelineError::IoError`], [`PipelineError::TimeoutError`]. The
//!   operation may succeed if attempted again.
//! - **Storage consistency**: [`PipelineError::DatabaseError`]. The audit
//!   transaction rolled back and the delivery should be redelivered.
//! - **Lineage race**: [`PipelineError::LineageViolation`]. A metric
//!   references an event that has not been persisted yet; resolved by broker
//!   redelivery once the event writer catches up.
//!
//! ## Design Principles
//!
//! - **Specific**: Each error type represents a specific failure mode
//! - **Actionable**: Error messages provide enough context for debugging
//! - **Categorized**: Errors are grouped by intent for systematic handling
//! - **Recoverable**: Transient errors are distinguishable from poison input

use thiserror::Error;

/// Domain-specific errors for the event processing pipeline.
///
/// This enum represents all possible errors that can occur within the domain
/// layer and at the infrastructure seams that report back into it. Each
/// variant includes a descriptive message designed to provide clear
/// information about what went wrong.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Lineage violation: {0}")]
    LineageViolation(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new validation error
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization_error(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Creates a new broker error
    pub fn broker_error(msg: impl Into<String>) -> Self {
        Self::BrokerError(msg.into())
    }

    /// Creates a new database error
    pub fn database_error(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    /// Creates a new lineage violation error
    pub fn lineage_violation(msg: impl Into<String>) -> Self {
        Self::LineageViolation(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a cancellation error with a default message
    pub fn cancelled() -> Self {
        Self::Cancelled("operation cancelled".to_string())
    }

    /// Checks if the error is transient and the operation may succeed on
    /// retry.
    ///
    /// Transient errors drive the validator's exponential backoff and the
    /// audit store's negative acknowledgements; poison errors never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::BrokerError(_)
                | PipelineError::IoError(_)
                | PipelineError::TimeoutError(_)
                | PipelineError::DatabaseError(_)
                | PipelineError::LineageViolation(_)
        )
    }

    /// Checks if the error marks poison input that can never succeed on
    /// retry.
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            PipelineError::ValidationError(_) | PipelineError::SerializationError(_)
        )
    }

    /// Gets the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::ValidationError(_) => "validation",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::BrokerError(_) => "broker",
            PipelineError::DatabaseError(_) => "database",
            PipelineError::LineageViolation(_) => "lineage",
            PipelineError::IoError(_) => "io",
            PipelineError::TimeoutError(_) => "timeout",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::InternalError(_) => "internal",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        PipelineError::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::SerializationError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PipelineError::broker_error("connection reset").is_transient());
        assert!(PipelineError::database_error("database is locked").is_transient());
        assert!(PipelineError::lineage_violation("missing event").is_transient());
        assert!(!PipelineError::validation_error("bad region").is_transient());
    }

    #[test]
    fn test_poison_classification() {
        assert!(PipelineError::validation_error("bad region").is_poison());
        assert!(PipelineError::serialization_error("not json").is_poison());
        assert!(!PipelineError::broker_error("connection reset").is_poison());
    }

    #[test]
    fn test_display_messages() {
        let err = PipelineError::database_error("constraint failed");
        assert_eq!(err.to_string(), "Database error: constraint failed");
        assert_eq!(err.category(), "database");
    }
}
