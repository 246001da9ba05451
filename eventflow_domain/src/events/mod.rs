// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Messages
//!
//! The JSON messages the pipeline emits beyond the event envelope itself:
//! window summaries and per-region metrics on `analytics_exchange`, and the
//! dead-letter wrapper on `dlq_exchange`.

pub mod analytics;
pub mod dead_letter;

pub use analytics::{RegionMetric, RegionStats, WindowSummary};
pub use dead_letter::DeadLetter;
