// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Journal
//!
//! Append-only JSON-Lines side channel next to the SQLite audit store. One
//! JSON object per line, UTF-8, keys `audit_timestamp` and `event_content`.
//!
//! The journal is **best-effort**: a write failure is logged by the caller
//! and never blocks the database path. It exists for the replay reader,
//! which streams it back into `events_exchange`, and for humans with
//! `grep`. Partial trailing lines after a crash are tolerated; the replay
//! reader skips anything that does not parse.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use eventflow_domain::PipelineError;

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Wall-clock instant the audit service persisted the event.
    pub audit_timestamp: String,
    /// The audited event, verbatim.
    pub event_content: Value,
}

/// Append-only JSON-Lines journal.
#[derive(Debug, Clone)]
pub struct AuditJournal {
    path: PathBuf,
}

impl AuditJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event as a journal line.
    ///
    /// Creates the parent directory on first use. The line is written in a
    /// single call; the trailing newline terminates the record.
    pub async fn append(&self, event: &Value) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let entry = JournalEntry {
            audit_timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            event_content: event.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
