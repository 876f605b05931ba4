use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jobs::{Job, JobKind, JobPatch, JobStatus};
use crate::core::pipeline::ProcessOptions;
use crate::core::publish::PublishedReference;
use crate::core::service::ProcessingService;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProcessRequest {
    /// Raw text to process; alternatively `index` into the dataset.
    pub content: Option<String>,
    pub index: Option<usize>,
    #[serde(default)]
    pub schedule_days: i64,
    #[serde(default)]
    pub attach_asset: bool,
}

impl ProcessRequest {
    fn options(&self) -> ProcessOptions {
        ProcessOptions {
            schedule_offset_days: self.schedule_days,
            attach_latest_asset: self.attach_asset,
        }
    }

    fn check(&self) -> PipelineResult<()> {
        match (&self.content, self.index) {
            (Some(_), Some(_)) => Err(PipelineError::Validation(
                "send either `content` or `index`, not both".into(),
            )),
            (None, None) => Err(PipelineError::Validation(
                "`content` or `index` is required".into(),
            )),
            _ => Ok(()),
        }
    }

    async fn run(&self, service: &ProcessingService) -> PipelineResult<PublishedReference> {
        let options = self.options();
        match (&self.content, self.index) {
            (Some(content), _) => service.process_one(content, &options).await,
            (None, Some(index)) => service.process_index(index, &options).await,
            (None, None) => Err(PipelineError::Validation(
                "`content` or `index` is required".into(),
            )),
        }
    }
}

pub async fn process_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Response {
    if let Err(e) = req.check() {
        return error_response(&e).into_response();
    }
    match req.run(&state.service).await {
        Ok(reference) => Json(json!({
            "success": true,
            "url": reference.url,
            "page_id": reference.page_id,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn process_start_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Response {
    if let Err(e) = req.check() {
        return error_response(&e).into_response();
    }

    let job = state
        .jobs
        .create(Job::new(JobKind::Single, "Processing queued"))
        .await;
    let job_id = job.job_id.clone();
    info!("Job {} accepted", job_id);

    let jobs = state.jobs.clone();
    let service = state.service.clone();
    let id = job_id.clone();
    tokio::spawn(async move {
        jobs.update(&id, JobPatch::status(JobStatus::Processing, "Processing"))
            .await;
        let patch = match req.run(&service).await {
            Ok(reference) => JobPatch::completed(
                "Published",
                json!({ "url": reference.url, "page_id": reference.page_id }),
            ),
            Err(e) => JobPatch::failed("Processing failed", e.to_string()),
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

pub async fn job_status_endpoint(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.jobs.get(&job_id).await {
        Ok(job) => Json(json!({ "success": true, "job": job })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn list_jobs_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.jobs.list().await;
    Json(json!({
        "success": true,
        "total": jobs.len(),
        "jobs": jobs,
    }))
}

/// Forgets the job. Work already in flight keeps running.
pub async fn delete_job_endpoint(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.jobs.delete(&job_id).await {
        Ok(job) => Json(json!({
            "success": true,
            "job_id": job.job_id,
            "message": "Job removed; running work is not interrupted",
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
