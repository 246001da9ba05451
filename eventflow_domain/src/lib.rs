// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # EventFlow Domain
//!
//! The domain layer of the eventflow processing pipeline: the business
//! rules for validating, aggregating, and auditing heterogeneous events,
//! completely independent of the broker, the database, and the runtime.
//!
//! ## Module Structure
//!
//! - [`entities`]: the event envelope and its tagged payload variants
//! - [`value_objects`]: self-validating values: event ids and regions
//! - [`services`]: the schema registry (declarative validation rules)
//! - [`aggregates`]: the tumbling aggregation window and its flush cycle
//! - [`events`]: the pipeline's emitted messages: window summaries,
//!   per-region metrics with lineage, and dead-letter wrappers
//! - [`repositories`]: the audit persistence port implemented by
//!   infrastructure
//! - [`error`]: the unified [`PipelineError`] type
//!
//! ## Domain-Driven Design Concepts
//!
//! ### Entities
//! Objects with identity that persists through representation changes.
//! The [`entities::EventEnvelope`] is identified by its `event_id`; two
//! deliveries of the same envelope are the same event, which is what makes
//! deduplication and idempotent storage meaningful.
//!
//! ### Value Objects
//! Immutable, self-validating values compared by attributes:
//! [`value_objects::EventId`] and [`value_objects::Region`].
//!
//! ### Aggregates
//! Consistency boundaries that change as a unit. The
//! [`aggregates::AggregationWindow`] owns four pieces of state that always
//! reset together on flush.
//!
//! ### Domain Services
//! Stateless operations on domain objects. The schema registry in
//! [`services`] validates raw wire values against declarative rule tables.
//!
//! ## What the Domain Does Not Know
//!
//! No tokio, no AMQP, no SQL. The broker topology, delivery
//! acknowledgement, retry backoff, and storage transactions are
//! infrastructure concerns that *consume* these types; the domain only
//! states the rules they must uphold.

pub mod aggregates;
pub mod entities;
pub mod error;
pub mod events;
pub mod repositories;
pub mod services;
pub mod value_objects;

// Re-export commonly used types for convenient access
// These exports provide a clean API surface for consumers of the domain layer
pub use aggregates::{AggregationWindow, Observation, WindowFlush};
pub use entities::{EventEnvelope, EventPayload, EventSource};
pub use error::PipelineError;
pub use events::{DeadLetter, RegionMetric, RegionStats, WindowSummary};
pub use repositories::{AuditRepository, EventRecord};
pub use services::{validate_event, ValidationFailure, ValidationFailureKind};
pub use value_objects::{EventId, Region};
