//! Bounded polling of asynchronous backend tasks.
//!
//! The wait between attempts is fixed — back-off growth belongs to the batch
//! scheduler's retry policy, not this layer.

use std::time::Duration;

use tracing::{debug, instrument};

use siteharvest_shared::{HarvestError, Result};

use crate::response::{RemoteResult, TaskStatusResponse};

/// Per-attempt task state, derived from the backend's status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
}

impl TaskState {
    /// Terminal states are `completed` and `failed`; anything else is
    /// treated as still running.
    pub fn from_status(status: &str) -> Self {
        match status {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Poll a task via `probe` until it reaches a terminal state or
/// `max_attempts` is exhausted, waiting `delay` between attempts.
///
/// Fails with `TaskFailed` on a terminal-failed reply, `PollingExhausted`
/// after `max_attempts` non-terminal replies, or `Network` when every
/// attempt's transport call itself errored.
#[instrument(skip_all, fields(task_id = %task_id, max_attempts))]
pub async fn poll_until_done<F, Fut>(
    task_id: &str,
    max_attempts: u32,
    delay: Duration,
    mut probe: F,
) -> Result<Vec<RemoteResult>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskStatusResponse>>,
{
    let mut transport_errors = 0u32;
    let mut last_transport_error = None;

    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(status) => match TaskState::from_status(&status.status) {
                TaskState::Completed => {
                    debug!(attempt, "task completed");
                    return Ok(status.results.unwrap_or_default());
                }
                TaskState::Failed => {
                    return Err(HarvestError::TaskFailed(
                        status.error.unwrap_or_else(|| "task reported failure".into()),
                    ));
                }
                TaskState::Pending => {
                    debug!(attempt, status = %status.status, "task still running");
                }
            },
            Err(e) => {
                transport_errors += 1;
                debug!(attempt, error = %e, "poll transport error");
                last_transport_error = Some(e);
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }

    if transport_errors == max_attempts {
        let cause = last_transport_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into());
        return Err(HarvestError::Network(format!(
            "every poll attempt for task {task_id} failed: {cause}"
        )));
    }

    Err(HarvestError::PollingExhausted {
        task_id: task_id.to_string(),
        attempts: max_attempts,
    })
}
