// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # EventFlow
//!
//! Distributed event-processing pipeline over a topic-based message
//! broker. Heterogeneous events (security incidents, victimization
//! surveys, migration cases) flow through four stages connected by
//! durable exchanges:
//!
//! ```text
//! publisher → events_exchange → validator → processing_exchange
//!           → { aggregator, audit } → analytics_exchange
//!           → { dashboard, audit (metrics) }
//! ```
//!
//! Invalid messages leave the validator on `dlq_exchange` with routing key
//! `deadletter.validation`. A replay reader re-injects the audit journal
//! into `events_exchange` to reprocess history.
//!
//! ## Guarantees
//!
//! - **At-least-once** delivery end to end: durable queues, explicit acks,
//!   redelivery on reconnect.
//! - **Idempotency** where redelivery bites: the aggregator dedups by
//!   `event_id` per window; the audit store's primary keys collapse
//!   replays across all time.
//! - **Lineage**: every metric row references the exact set of events it
//!   was computed from, enforced by foreign keys.
//!
//! ## Layers
//!
//! - [`application`]: one service per pipeline stage
//! - [`infrastructure`]: broker adapter, SQLite audit store, JSON-Lines
//!   journal, env configuration, dashboard HTTP endpoint, task supervision
//!
//! Domain types live in the `eventflow-domain` crate; process lifecycle
//! (signals, shutdown, exit codes) in `eventflow-bootstrap`.

pub mod application;
pub mod infrastructure;
