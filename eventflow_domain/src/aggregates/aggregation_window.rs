// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Aggregation Window Aggregate
//!
//! This module provides the tumbling-window state the aggregator folds
//! deliveries into, together with its close/flush lifecycle.
//!
//! ## Overview
//!
//! The window is a single-owner aggregate: the consumer loop owns it
//! exclusively and mutates it only between deliveries, so no shared
//! ownership or locking is required. It holds four pieces of state that
//! always reset together:
//!
//! - the instant the window opened (monotonic, for expiry checks)
//! - the wall-clock instant it opened (for the published summary)
//! - the set of event ids already counted (the per-window dedup set)
//! - per-region/per-source counters and the per-region lineage id sets
//!
//! ## Windowing model
//!
//! Windows are *tumbling*: non-overlapping, contiguous, fixed-duration.
//! Closing is **lazy**: the owner asks [`AggregationWindow::is_expired`]
//! after folding each delivery and calls [`AggregationWindow::close`] when
//! the window length has elapsed. With no deliveries arriving, the window
//! stays open indefinitely; that tradeoff is deliberate and documented at
//! the service level.
//!
//! ## Deduplication scope
//!
//! The dedup set is scoped to the open window. The same event delivered
//! twice within one window is counted once; delivered again after a flush
//! it counts again. Cross-window dedup belongs to the audit store, whose
//! primary key collapses replays across all time.

use chrono::Local;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, Instant};

use crate::events::{RegionMetric, RegionStats, WindowSummary};

/// Region/source bucket used when an event lacks the field.
const UNKNOWN_BUCKET: &str = "unknown";

/// Run identifier stamped on metrics emitted by a live aggregator.
const DEFAULT_RUN_ID: &str = "default";

/// Wall-clock format for the published window boundaries.
const WINDOW_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Outcome of folding one delivery into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The event was counted into the window.
    Counted,
    /// The event id was already counted in this window; nothing changed.
    Duplicate,
}

/// Everything a window flush publishes: the summary, then one metric per
/// region present in the window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFlush {
    pub summary: WindowSummary,
    pub metrics: Vec<RegionMetric>,
}

/// Tumbling-window counters with per-window deduplication and lineage.
#[derive(Debug)]
pub struct AggregationWindow {
    opened: Instant,
    started_at_iso: String,
    processed_ids: HashSet<String>,
    stats: RegionStats,
    events_by_region: BTreeMap<String, BTreeSet<String>>,
}

impl AggregationWindow {
    /// Opens a fresh window starting now.
    pub fn new() -> Self {
        Self {
            opened: Instant::now(),
            started_at_iso: Local::now().format(WINDOW_ISO_FORMAT).to_string(),
            processed_ids: HashSet::new(),
            stats: RegionStats::new(),
            events_by_region: BTreeMap::new(),
        }
    }

    /// Folds one delivery into the window.
    ///
    /// Absent `region` or `source` count under the `"unknown"` bucket. An
    /// absent `event_id` is still counted but contributes nothing to the
    /// dedup set or the region's lineage; such events can only reach the
    /// aggregator through replay tooling, since validation requires the id.
    pub fn observe(
        &mut self,
        region: Option<&str>,
        source: Option<&str>,
        event_id: Option<&str>,
    ) -> Observation {
        if let Some(id) = event_id {
            if self.processed_ids.contains(id) {
                return Observation::Duplicate;
            }
        }

        let region = region.unwrap_or(UNKNOWN_BUCKET);
        let source = source.unwrap_or(UNKNOWN_BUCKET);

        *self
            .stats
            .entry(region.to_string())
            .or_default()
            .entry(source.to_string())
            .or_insert(0) += 1;

        if let Some(id) = event_id {
            self.processed_ids.insert(id.to_string());
            self.events_by_region
                .entry(region.to_string())
                .or_default()
                .insert(id.to_string());
        }

        Observation::Counted
    }

    /// Lazy-close test: has the window been open at least `window_len`?
    ///
    /// `now` is passed in so expiry is testable without sleeping.
    pub fn is_expired(&self, now: Instant, window_len: Duration) -> bool {
        now.duration_since(self.opened) >= window_len
    }

    /// True when no delivery has been counted since the window opened.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Number of distinct event ids counted in the open window.
    pub fn total_processed(&self) -> usize {
        self.processed_ids.len()
    }

    /// Closes the window.
    ///
    /// An empty window produces no messages: only the timestamps reset, and
    /// `None` is returned. Otherwise the summary and per-region metrics are
    /// built, all four state fields reset atomically, and the next window
    /// starts now.
    pub fn close(&mut self) -> Option<WindowFlush> {
        if self.stats.is_empty() {
            self.opened = Instant::now();
            self.started_at_iso = Local::now().format(WINDOW_ISO_FORMAT).to_string();
            return None;
        }

        let now = Local::now();
        let summary = WindowSummary {
            message_type: WindowSummary::MESSAGE_TYPE.to_string(),
            window_start_iso: self.started_at_iso.clone(),
            window_end_iso: now.format(WINDOW_ISO_FORMAT).to_string(),
            total_processed: self.processed_ids.len() as u64,
            stats_by_region: self.stats.clone(),
        };

        // Cross-midnight windows stamp the date at flush time; the
        // ambiguity is documented, not resolved.
        let date = now.date_naive().to_string();
        let metrics = self
            .stats
            .iter()
            .map(|(region, counters)| RegionMetric {
                metric_id: uuid::Uuid::new_v4().to_string(),
                date: date.clone(),
                region: region.clone(),
                run_id: DEFAULT_RUN_ID.to_string(),
                metrics: counters.clone(),
                input_event_ids: self
                    .events_by_region
                    .get(region)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect();

        self.processed_ids = HashSet::new();
        self.stats = RegionStats::new();
        self.events_by_region = BTreeMap::new();
        self.opened = Instant::now();
        self.started_at_iso = now.format(WINDOW_ISO_FORMAT).to_string();

        Some(WindowFlush { summary, metrics })
    }
}

impl Default for AggregationWindow {
    fn default() -> Self {
        Self::new()
    }
}
