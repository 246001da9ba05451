// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entities
//!
//! Domain objects with identity. The event envelope is the only entity in
//! this domain: its `event_id` persists across redeliveries, replays, and
//! storage, which is what makes idempotent processing possible.

pub mod event_envelope;

pub use event_envelope::{
    EventEnvelope, EventPayload, EventSource, GeoLocation, MigrationCase, SecurityIncident,
    VictimizationSurvey,
};
