//! Bookkeeping for fire-and-forget submissions, polled by clients.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub message: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Pending,
            message: message.into(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields to overwrite on an existing job; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn completed(message: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::status(JobStatus::Completed, message)
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(JobStatus::Failed, message)
        }
    }

    fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(message) = self.message {
            job.message = message;
        }
        if let Some(result) = self.result {
            job.result = Some(result);
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
        job.updated_at = Utc::now();
    }
}

/// Key-value storage behind the job store.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn get(&self, job_id: &str) -> Option<Job>;
    async fn set(&self, job: Job);
    /// Applies the patch atomically. Returns the updated job, or `None` when
    /// the id is unknown.
    async fn update(&self, job_id: &str, patch: JobPatch) -> Option<Job>;
    async fn delete(&self, job_id: &str) -> Option<Job>;
    async fn list(&self) -> Vec<Job>;
}

/// Process-lifetime map; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryJobBackend {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    async fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    async fn set(&self, job: Job) {
        self.jobs.write().await.insert(job.job_id.clone(), job);
    }

    async fn update(&self, job_id: &str, patch: JobPatch) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id)?;
        patch.apply(job);
        Some(job.clone())
    }

    async fn delete(&self, job_id: &str) -> Option<Job> {
        self.jobs.write().await.remove(job_id)
    }

    async fn list(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }
}

#[derive(Clone)]
pub struct JobStatusStore {
    backend: Arc<dyn JobBackend>,
}

impl JobStatusStore {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryJobBackend::new()))
    }

    pub async fn create(&self, job: Job) -> Job {
        debug!("Job {} created ({:?})", job.job_id, job.kind);
        self.backend.set(job.clone()).await;
        job
    }

    pub async fn get(&self, job_id: &str) -> PipelineResult<Job> {
        self.backend
            .get(job_id)
            .await
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Updates to a job that was deleted meanwhile are dropped.
    pub async fn update(&self, job_id: &str, patch: JobPatch) -> Option<Job> {
        let updated = self.backend.update(job_id, patch).await;
        if updated.is_none() {
            warn!("Dropping update for unknown job {}", job_id);
        }
        updated
    }

    /// Removes the bookkeeping only; work already running is not stopped.
    pub async fn delete(&self, job_id: &str) -> PipelineResult<Job> {
        self.backend
            .delete(job_id)
            .await
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs = self.backend.list().await;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}
