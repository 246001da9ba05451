// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Supervision
//!
//! Helpers for spawning the pipeline's long-running tasks (consumer loops,
//! the dashboard's HTTP acceptor) with lifecycle logging and mandatory
//! joining, so no task failure disappears silently.

use tokio::task::JoinHandle;
use tracing::{debug, error};

use eventflow_domain::PipelineError;

/// Result type alias for application operations
pub type AppResult<T> = Result<T, PipelineError>;

/// Spawns a supervised task with automatic error logging and lifecycle
/// tracking.
///
/// Wraps `tokio::spawn` with supervision that logs task start and outcome
/// and returns a `JoinHandle` the caller must await. The audit service uses
/// this for its two writers; the dashboard for its consumer and HTTP tasks.
///
/// # Example
///
/// ```ignore
/// let handle = spawn_supervised("audit-event-writer", async move {
///     run_event_writer().await
/// });
/// join_supervised(handle).await?;
/// ```
pub fn spawn_supervised<F, T>(name: &'static str, fut: F) -> JoinHandle<AppResult<T>>
where
    F: std::future::Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    debug!(task = name, "task starting");

    tokio::spawn(async move {
        let result = fut.await;

        match &result {
            Ok(_) => debug!(task = name, "task completed successfully"),
            Err(e) => error!(task = name, error = ?e, "task failed"),
        }

        result
    })
}

/// Awaits a supervised task handle and propagates errors.
///
/// Converts task panics and cancellations into typed errors so callers see
/// one failure channel, the task's own `AppResult`.
pub async fn join_supervised<T>(handle: JoinHandle<AppResult<T>>) -> AppResult<T> {
    let join_result: Result<AppResult<T>, tokio::task::JoinError> = handle.await;

    match join_result {
        Ok(task_result) => task_result,
        Err(e) => {
            if e.is_panic() {
                Err(PipelineError::internal_error(format!("task panicked: {}", e)))
            } else if e.is_cancelled() {
                Err(PipelineError::cancelled())
            } else {
                Err(PipelineError::internal_error(format!("task join failed: {}", e)))
            }
        }
    }
}
