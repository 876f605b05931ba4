pub mod batch;
pub mod dataset;
pub mod health;
pub mod process;

use axum::Json;
use axum::http::StatusCode;
use serde_json::json;

use crate::core::error::PipelineError;

/// Maps a domain failure to the `{"success": false, ...}` envelope.
pub(crate) fn error_response(e: &PipelineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        PipelineError::Validation(_) | PipelineError::Dataset(_) => StatusCode::BAD_REQUEST,
        PipelineError::JobNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::Task { .. }
        | PipelineError::EmptyResponse { .. }
        | PipelineError::MalformedResponse(_)
        | PipelineError::Transport(_)
        | PipelineError::Publish(_)
        | PipelineError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
    };
    let mut body = json!({ "success": false, "error": e.to_string() });
    if let Some(task_status) = e.task_status() {
        body["task_status"] = json!(task_status);
    }
    (status, Json(body))
}
