//! External analysis tasks: the executor interface, the callback registry and
//! the runner that drives one task to a terminal state.

pub mod callbacks;
pub mod openai;
mod runner;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::core::error::PipelineResult;

pub use callbacks::CallbackRegistry;
pub use runner::{RunOptions, TaskRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    AwaitingCallback,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingCallback => "awaiting_callback",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Expired
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a task may move from `from` to `to`. Terminal states are final;
/// nothing returns to `Queued`.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    if from == to {
        return true;
    }
    !from.is_terminal() && to != TaskStatus::Queued
}

/// One unit of work in flight on the external system. The session belongs to
/// this task alone and is torn down once the task is finished with.
#[derive(Debug, Clone)]
pub struct ExternalTask {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl ExternalTask {
    pub fn new(task_id: impl Into<String>, session_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            status,
            submitted_at: Utc::now(),
            last_polled_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallbackRequest {
    pub call_id: String,
    pub function_name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CallbackOutput {
    pub call_id: String,
    pub output: String,
}

/// What a single poll observed.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub status: TaskStatus,
    pub callback_requests: Vec<CallbackRequest>,
    pub result: Option<String>,
    pub diagnostic: Option<String>,
}

impl PollSnapshot {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            callback_requests: Vec::new(),
            result: None,
            diagnostic: None,
        }
    }

    #[cfg(test)]
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Self::status(TaskStatus::Completed)
        }
    }

    pub fn failed(status: TaskStatus, diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: Some(diagnostic.into()),
            ..Self::status(status)
        }
    }

    pub fn awaiting(callback_requests: Vec<CallbackRequest>) -> Self {
        Self {
            callback_requests,
            ..Self::status(TaskStatus::AwaitingCallback)
        }
    }
}

/// The external system that runs long analysis tasks.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn submit(&self, input: &str, executor_id: &str) -> PipelineResult<ExternalTask>;

    async fn poll(&self, task: &ExternalTask) -> PipelineResult<PollSnapshot>;

    async fn submit_callback_outputs(
        &self,
        task: &ExternalTask,
        outputs: &[CallbackOutput],
    ) -> PipelineResult<ExternalTask>;

    async fn cancel(&self, task: &ExternalTask) -> PipelineResult<()>;

    async fn teardown(&self, session_id: &str) -> PipelineResult<()>;
}
