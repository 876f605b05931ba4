//! One content item through extraction, post generation and publishing.

mod record;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::assistant::{RunOptions, TaskRunner};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::publish::{AssetLocator, AssetReference, PublishedReference, Publisher};

pub use record::{ProcessedRecord, Source, StructuredFields};

/// Assistant ids used by each generation stage.
#[derive(Debug, Clone)]
pub struct StageAssistants {
    pub extraction: String,
    pub post: String,
    pub caption: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ProcessOptions {
    #[serde(default)]
    pub schedule_offset_days: i64,
    #[serde(default)]
    pub attach_latest_asset: bool,
}

#[derive(Clone)]
pub struct ContentPipeline {
    runner: TaskRunner,
    assistants: StageAssistants,
    run_options: RunOptions,
    publisher: Arc<dyn Publisher>,
    assets: Option<Arc<dyn AssetLocator>>,
}

impl ContentPipeline {
    pub fn new(
        runner: TaskRunner,
        assistants: StageAssistants,
        run_options: RunOptions,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            runner,
            assistants,
            run_options,
            publisher,
            assets: None,
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetLocator>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Runs the stages strictly in order. The first failing stage aborts the
    /// whole item; nothing partial is returned.
    pub async fn process(&self, raw_content: &str) -> PipelineResult<ProcessedRecord> {
        let content = raw_content.trim();
        if content.is_empty() {
            return Err(PipelineError::Validation("content is empty".to_string()));
        }

        info!("Stage 1/3: structured extraction");
        let reply = self
            .runner
            .run(content, &self.assistants.extraction, &self.run_options)
            .await?;
        let fields = StructuredFields::parse(&reply)?;
        debug!(
            "Extracted \"{}\" citing [{}]",
            fields.title,
            fields
                .sources
                .iter()
                .map(Source::label)
                .collect::<Vec<_>>()
                .join("; ")
        );

        info!("Stage 2/3: post text");
        let social_text = self
            .runner
            .run(&fields.answer, &self.assistants.post, &self.run_options)
            .await?;

        info!("Stage 3/3: caption");
        let social_caption = self
            .runner
            .run(content, &self.assistants.caption, &self.run_options)
            .await?;

        Ok(ProcessedRecord::assemble(
            fields,
            raw_content,
            &social_text,
            &social_caption,
        ))
    }

    pub async fn process_one(
        &self,
        raw_content: &str,
        options: &ProcessOptions,
    ) -> PipelineResult<PublishedReference> {
        let record = self.process(raw_content).await?;

        let asset = if options.attach_latest_asset {
            self.latest_asset().await
        } else {
            None
        };

        let reference = self
            .publisher
            .publish(record, options.schedule_offset_days, asset.as_ref())
            .await?;
        info!("Published {}", reference.url);
        Ok(reference)
    }

    /// Lookup failures degrade to publishing without an image.
    async fn latest_asset(&self) -> Option<AssetReference> {
        let Some(assets) = &self.assets else {
            warn!("Asset attachment requested but no asset folder is configured");
            return None;
        };
        match assets.latest().await {
            Ok(Some(asset)) => {
                info!("Attaching asset {}", asset.name);
                Some(asset)
            }
            Ok(None) => {
                warn!("No asset found to attach");
                None
            }
            Err(e) => {
                warn!("Asset lookup failed, publishing without image: {}", e);
                None
            }
        }
    }
}
