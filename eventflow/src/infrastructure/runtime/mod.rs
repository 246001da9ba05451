// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Utilities
//!
//! Task supervision for the pipeline's long-running services.

pub mod supervisor;

pub use supervisor::{join_supervised, spawn_supervised, AppResult};
