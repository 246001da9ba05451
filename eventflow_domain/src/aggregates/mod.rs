// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Aggregates
//!
//! Consistency boundaries that change as a unit. The aggregation window is
//! the one aggregate here: its four state fields always reset together on
//! flush, never piecewise.

pub mod aggregation_window;

pub use aggregation_window::{AggregationWindow, Observation, WindowFlush};
