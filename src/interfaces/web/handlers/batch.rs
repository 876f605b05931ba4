use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::core::batch::{BatchProgress, BatchReport, FailFastAbort};
use crate::core::jobs::{Job, JobKind, JobPatch, JobStatus};
use crate::core::service::BatchRequest;

fn batch_body(outcome: &Result<BatchReport, FailFastAbort>) -> Value {
    match outcome {
        Ok(report) => json!({
            "success": true,
            "status": report.status,
            "report": report,
        }),
        Err(abort) => json!({
            "success": false,
            "status": abort.report.status,
            "fail_fast_triggered_at_index": abort.triggered_at_index,
            "error": abort.cause,
            "report": abort.report,
        }),
    }
}

pub async fn batch_endpoint(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Response {
    match state.service.run_batch_request(&req, None).await {
        Ok(outcome) => Json(batch_body(&outcome)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn batch_start_endpoint(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Response {
    // reject a bad slice now rather than inside the job
    if let Err(e) = req.check(&state.service) {
        return error_response(&e).into_response();
    }
    let size = req.contents.as_ref().map_or(req.count, Vec::len);

    let job = state
        .jobs
        .create(Job::new(
            JobKind::Batch,
            format!("Batch of {} queued from index {}", size, req.start_index),
        ))
        .await;
    let job_id = job.job_id.clone();
    info!("Batch job {} accepted", job_id);

    let jobs = state.jobs.clone();
    let service = state.service.clone();
    let id = job_id.clone();
    tokio::spawn(async move {
        jobs.update(&id, JobPatch::status(JobStatus::Processing, "Batch started"))
            .await;

        let (tx, mut rx) = mpsc::channel::<BatchProgress>(32);
        let progress_jobs = jobs.clone();
        let progress_id = id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                progress_jobs
                    .update(
                        &progress_id,
                        JobPatch::message(format!(
                            "Processed {}/{} (succeeded {}, failed {})",
                            p.position, p.total, p.succeeded, p.failed
                        )),
                    )
                    .await;
            }
        });

        let outcome = service.run_batch_request(&req, Some(tx)).await;
        let _ = forwarder.await;

        let patch = match outcome {
            Ok(Ok(report)) => JobPatch::completed(
                format!(
                    "Batch completed: {}/{} succeeded",
                    report.succeeded, report.processed
                ),
                json!(report),
            ),
            Ok(Err(abort)) => JobPatch {
                result: Some(json!(abort.report)),
                ..JobPatch::failed(
                    format!("Batch halted at item {}", abort.triggered_at_index),
                    abort.cause.clone(),
                )
            },
            Err(e) => JobPatch::failed("Batch failed", e.to_string()),
        };
        jobs.update(&id, patch).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "job_id": job_id,
            "status": job.status,
            "polling_url": format!("/api/process/status/{}", job_id),
        })),
    )
        .into_response()
}
