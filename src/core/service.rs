//! Wiring shared by the CLI and the HTTP surface.

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::assistant::openai::OpenAiAssistantsExecutor;
use crate::core::assistant::{CallbackRegistry, TaskExecutor, TaskRunner};
use crate::core::batch::{
    BatchOrchestrator, BatchProgress, BatchReport, FailFastAbort, PipelineItemHandler,
    RetryingItemProcessor,
};
use crate::core::clock::{Clock, TokioClock};
use crate::core::config::{AppConfig, BatchConfig};
use crate::core::dataset::Dataset;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::pipeline::{ContentPipeline, ProcessOptions, StageAssistants};
use crate::core::publish::{LatestAssetLocator, NotionPublisher, Publisher, PublishedReference};

/// One batch: either `contents` given inline, numbered from `start_index`,
/// or `count` dataset entries from `start_index`. Unset knobs fall back to
/// `[batch]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub contents: Option<Vec<String>>,
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
    #[serde(default)]
    pub schedule_days: i64,
    #[serde(default)]
    pub attach_asset: bool,
}

impl BatchRequest {
    /// Rejects a dataset slice that cannot be served. Inline contents are
    /// always accepted.
    pub fn check(&self, service: &ProcessingService) -> PipelineResult<()> {
        if self.contents.is_none() {
            service.dataset()?.range(self.start_index, self.count)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ProcessingService {
    pipeline: ContentPipeline,
    dataset: Option<Arc<Dataset>>,
    batch: BatchConfig,
    clock: Arc<dyn Clock>,
}

impl ProcessingService {
    pub fn new(
        pipeline: ContentPipeline,
        dataset: Option<Arc<Dataset>>,
        batch: BatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pipeline,
            dataset,
            batch,
            clock,
        }
    }

    /// Builds the production stack. A missing dataset only disables the
    /// dataset-backed operations.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let dataset = match Dataset::load(&config.dataset.path).await {
            Ok(d) => Some(Arc::new(d)),
            Err(e) => {
                warn!("Dataset unavailable: {}", e);
                None
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let executor: Arc<dyn TaskExecutor> = Arc::new(OpenAiAssistantsExecutor::new(&config.openai));
        let callbacks = Arc::new(CallbackRegistry::with_builtins(dataset.clone()));
        info!("Callback handlers: {}", callbacks.names().join(", "));
        let runner = TaskRunner::new(executor, callbacks, clock.clone());

        let publisher: Arc<dyn Publisher> = Arc::new(NotionPublisher::new(&config.notion));
        let mut pipeline = ContentPipeline::new(
            runner,
            StageAssistants {
                extraction: config.openai.extraction_assistant.clone(),
                post: config.openai.post_assistant.clone(),
                caption: config.openai.caption_assistant.clone(),
            },
            config.openai.run_options(),
            publisher,
        );
        match (&config.assets.dir, &config.assets.base_url) {
            (Some(dir), Some(base_url)) => {
                pipeline =
                    pipeline.with_assets(Arc::new(LatestAssetLocator::new(dir.clone(), base_url)));
            }
            (None, None) => {}
            _ => {
                return Err(PipelineError::Config(
                    "assets.dir and assets.base_url must be set together".to_string(),
                )
                .into());
            }
        }

        Ok(Self::new(pipeline, dataset, config.batch.clone(), clock))
    }

    pub fn dataset(&self) -> PipelineResult<&Dataset> {
        self.dataset
            .as_deref()
            .ok_or_else(|| PipelineError::Dataset("no dataset loaded".to_string()))
    }

    pub async fn process_one(
        &self,
        content: &str,
        options: &ProcessOptions,
    ) -> PipelineResult<PublishedReference> {
        self.pipeline.process_one(content, options).await
    }

    /// Dataset entry `index`, published `schedule_days` out.
    pub async fn process_index(
        &self,
        index: usize,
        options: &ProcessOptions,
    ) -> PipelineResult<PublishedReference> {
        let content = self.dataset()?.entry(index)?;
        self.process_one(&content, options).await
    }

    pub fn orchestrator(&self, schedule_days: i64, attach_asset: bool) -> BatchOrchestrator {
        let handler = Arc::new(PipelineItemHandler::new(
            self.pipeline.clone(),
            schedule_days,
            attach_asset,
        ));
        let processor =
            RetryingItemProcessor::new(handler, self.batch.retry_policy(), self.clock.clone());
        BatchOrchestrator::new(processor, self.clock.clone(), self.batch.item_pause())
    }

    /// The outer error covers an invalid slice; the inner result is the
    /// batch outcome itself.
    pub async fn run_batch_request(
        &self,
        request: &BatchRequest,
        progress: Option<mpsc::Sender<BatchProgress>>,
    ) -> PipelineResult<Result<BatchReport, FailFastAbort>> {
        let mut orchestrator = self.orchestrator(request.schedule_days, request.attach_asset);
        if let Some(tx) = progress {
            orchestrator = orchestrator.with_progress(tx);
        }
        let max_retries = request.max_retries.unwrap_or(self.batch.max_retries);
        let fail_fast = request.fail_fast.unwrap_or(self.batch.fail_fast);

        let outcome = match &request.contents {
            Some(contents) => {
                orchestrator
                    .process_batch(contents.clone(), request.start_index, max_retries, fail_fast)
                    .await
            }
            None => {
                let items = self.dataset()?.range(request.start_index, request.count)?;
                orchestrator.run_batch(items, max_retries, fail_fast).await
            }
        };
        Ok(outcome)
    }
}
