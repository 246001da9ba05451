// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Analytics Messages
//!
//! Wire messages the aggregator publishes at window close: one
//! [`WindowSummary`] per window, then one [`RegionMetric`] per region that
//! contributed to it. Both are JSON on `analytics_exchange`; the summary is
//! consumed by the dashboard, the metrics by the audit store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-region, per-source counters. Ordered maps keep the serialized form
/// deterministic, which the tests rely on.
pub type RegionStats = BTreeMap<String, BTreeMap<String, u64>>;

fn default_run_id() -> String {
    "default".to_string()
}

/// Summary of one closed aggregation window.
///
/// `total_processed` always equals the number of distinct event ids counted
/// in the window, which in turn equals the sum of every counter in
/// `stats_by_region`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    /// Message discriminator, always `"window_summary"`.
    #[serde(rename = "type")]
    pub message_type: String,
    pub window_start_iso: String,
    pub window_end_iso: String,
    pub total_processed: u64,
    pub stats_by_region: RegionStats,
}

impl WindowSummary {
    pub const MESSAGE_TYPE: &'static str = "window_summary";
}

/// Per-region metric derived from one closed window, carrying its lineage.
///
/// `input_event_ids` lists, sorted, every event id that contributed to the
/// region's counters; the audit store turns each entry into a trace row
/// referencing the stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetric {
    pub metric_id: String,
    /// Civil date at flush time, `YYYY-MM-DD`.
    pub date: String,
    pub region: String,
    /// Falls back to `"default"` when the payload omits it; a broker
    /// header can still override it at ingestion time.
    #[serde(default = "default_run_id")]
    pub run_id: String,
    /// Per-source counters for this region.
    pub metrics: BTreeMap<String, u64>,
    pub input_event_ids: Vec<String>,
}
