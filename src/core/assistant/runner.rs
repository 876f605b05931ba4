use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    CallbackRegistry, CallbackRequest, ExternalTask, PollSnapshot, TaskExecutor, TaskStatus,
    can_transition,
};
use crate::core::clock::Clock;
use crate::core::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(4),
        }
    }
}

/// Drives one external task from submission to a terminal state.
///
/// The session created at submission is owned by a single `run` call and is
/// torn down exactly once when it returns, whatever the outcome.
#[derive(Clone)]
pub struct TaskRunner {
    executor: Arc<dyn TaskExecutor>,
    callbacks: Arc<CallbackRegistry>,
    clock: Arc<dyn Clock>,
}

impl TaskRunner {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        callbacks: Arc<CallbackRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            callbacks,
            clock,
        }
    }

    pub async fn run(
        &self,
        input: &str,
        executor_id: &str,
        options: &RunOptions,
    ) -> PipelineResult<String> {
        let mut task = self.executor.submit(input, executor_id).await?;
        info!(
            "Submitted task {} (session {}) to {}",
            task.task_id, task.session_id, executor_id
        );

        let outcome = self.drive(&mut task, options).await;
        match &outcome {
            Ok(_) => info!(
                "Task {} completed in {}s",
                task.task_id,
                (Utc::now() - task.submitted_at).num_seconds()
            ),
            Err(e) => warn!("Task {} did not complete: {}", task.task_id, e),
        }

        self.teardown(&task).await;
        outcome
    }

    async fn drive(&self, task: &mut ExternalTask, options: &RunOptions) -> PipelineResult<String> {
        let started = self.clock.now();
        let mut resolved: HashSet<String> = HashSet::new();

        loop {
            let snapshot = self.executor.poll(task).await?;
            observe(task, snapshot.status);

            match snapshot.status {
                TaskStatus::Completed => return completed_result(task, snapshot),
                TaskStatus::Failed | TaskStatus::Expired | TaskStatus::Cancelled => {
                    return Err(terminal_error(task, snapshot));
                }
                TaskStatus::AwaitingCallback => {
                    self.resolve_callbacks(task, snapshot.callback_requests, &mut resolved)
                        .await?;
                }
                TaskStatus::Queued | TaskStatus::Running => {}
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed > options.timeout {
                return self.expire(task, elapsed).await;
            }
            self.clock.sleep(options.poll_interval).await;
        }
    }

    /// Runs only the requests not answered earlier in this run and submits
    /// their outputs in one call.
    async fn resolve_callbacks(
        &self,
        task: &mut ExternalTask,
        requests: Vec<CallbackRequest>,
        resolved: &mut HashSet<String>,
    ) -> PipelineResult<()> {
        let pending: Vec<CallbackRequest> = requests
            .into_iter()
            .filter(|r| !resolved.contains(&r.call_id))
            .collect();
        if pending.is_empty() {
            debug!("Task {} awaiting callbacks already answered", task.task_id);
            return Ok(());
        }

        info!(
            "Task {} requested {} callback(s): {}",
            task.task_id,
            pending.len(),
            pending
                .iter()
                .map(|r| r.function_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let outputs = self.callbacks.resolve_all(&pending).await;
        let updated = self.executor.submit_callback_outputs(task, &outputs).await?;
        resolved.extend(pending.into_iter().map(|r| r.call_id));
        observe(task, updated.status);
        Ok(())
    }

    async fn expire(&self, task: &mut ExternalTask, elapsed: Duration) -> PipelineResult<String> {
        warn!(
            "Task {} exceeded its timeout after {:.1}s, cancelling",
            task.task_id,
            elapsed.as_secs_f64()
        );
        if let Err(e) = self.executor.cancel(task).await {
            warn!("Cancel request for task {} failed: {}", task.task_id, e);
        }

        let timed_out = format!("timed out after {:.1}s", elapsed.as_secs_f64());
        let snapshot = match self.executor.poll(task).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Could not fetch final status of task {}: {}", task.task_id, e);
                return Err(PipelineError::task(
                    &task.task_id,
                    TaskStatus::Expired,
                    timed_out,
                ));
            }
        };
        observe(task, snapshot.status);

        match snapshot.status {
            TaskStatus::Completed => completed_result(task, snapshot),
            TaskStatus::Cancelled | TaskStatus::Failed => {
                let status = snapshot.status;
                let diagnostic = match snapshot.diagnostic {
                    Some(d) => format!("{}: {}", timed_out, d),
                    None => timed_out,
                };
                Err(PipelineError::task(&task.task_id, status, diagnostic))
            }
            _ => Err(PipelineError::task(
                &task.task_id,
                TaskStatus::Expired,
                timed_out,
            )),
        }
    }

    async fn teardown(&self, task: &ExternalTask) {
        if let Err(e) = self.executor.teardown(&task.session_id).await {
            warn!("Failed to tear down session {}: {}", task.session_id, e);
        } else {
            debug!("Session {} torn down", task.session_id);
        }
    }
}

fn observe(task: &mut ExternalTask, status: TaskStatus) {
    if !can_transition(task.status, status) {
        debug!(
            "Task {} reported unexpected transition {} -> {}",
            task.task_id, task.status, status
        );
    }
    task.status = status;
    task.last_polled_at = Some(Utc::now());
}

fn completed_result(task: &ExternalTask, snapshot: PollSnapshot) -> PipelineResult<String> {
    match snapshot.result {
        Some(result) if !result.trim().is_empty() => Ok(result),
        _ => Err(PipelineError::EmptyResponse {
            task_id: task.task_id.clone(),
        }),
    }
}

fn terminal_error(task: &ExternalTask, snapshot: PollSnapshot) -> PipelineError {
    let diagnostic = snapshot
        .diagnostic
        .unwrap_or_else(|| "no diagnostic reported".to_string());
    PipelineError::task(&task.task_id, snapshot.status, diagnostic)
}
