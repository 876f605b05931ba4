use crate::core::assistant::TaskStatus;

/// Failures raised anywhere between the HTTP/CLI surface and the external
/// assistant or document store.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The external task reached a terminal state other than `completed`,
    /// or was cancelled after running past its timeout.
    #[error("task {task_id} ended as {status}: {diagnostic}")]
    Task {
        task_id: String,
        status: TaskStatus,
        diagnostic: String,
    },

    #[error("task {task_id} completed without a result")]
    EmptyResponse { task_id: String },

    #[error("invalid item: {0}")]
    Validation(String),

    #[error("malformed assistant response: {0}")]
    MalformedResponse(String),

    #[error("external request failed: {0}")]
    Transport(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<PipelineError>,
    },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn task(task_id: &str, status: TaskStatus, diagnostic: impl Into<String>) -> Self {
        PipelineError::Task {
            task_id: task_id.to_string(),
            status,
            diagnostic: diagnostic.into(),
        }
    }

    /// Terminal status of the external task, when the error came from one.
    pub fn task_status(&self) -> Option<TaskStatus> {
        match self {
            PipelineError::Task { status, .. } => Some(*status),
            PipelineError::RetriesExhausted { last_error, .. } => last_error.task_status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::MalformedResponse(e.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
