use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{BatchItem, ItemOutcome, RetryAttempt};
use crate::core::clock::Clock;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::pipeline::{ContentPipeline, ProcessOptions};
use crate::core::publish::PublishedReference;

/// Fixed backoff schedule indexed by the failed attempt, clamped at the last
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new([1, 2, 4, 8, 16].into_iter().map(Duration::from_secs).collect())
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(idx).copied().unwrap_or_default()
    }
}

/// One attempt at one item. `position` is the item's place in its batch.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: &BatchItem, position: usize) -> PipelineResult<PublishedReference>;
}

/// Runs an item through the content pipeline and publishes it
/// `schedule_base_days + position` days out.
pub struct PipelineItemHandler {
    pipeline: ContentPipeline,
    schedule_base_days: i64,
    attach_latest_asset: bool,
}

impl PipelineItemHandler {
    pub fn new(pipeline: ContentPipeline, schedule_base_days: i64, attach_latest_asset: bool) -> Self {
        Self {
            pipeline,
            schedule_base_days,
            attach_latest_asset,
        }
    }
}

#[async_trait]
impl ItemHandler for PipelineItemHandler {
    async fn handle(&self, item: &BatchItem, position: usize) -> PipelineResult<PublishedReference> {
        let options = ProcessOptions {
            schedule_offset_days: self.schedule_base_days.saturating_add(position as i64),
            attach_latest_asset: self.attach_latest_asset,
        };
        self.pipeline.process_one(&item.content, &options).await
    }
}

#[derive(Clone)]
pub struct RetryingItemProcessor {
    handler: Arc<dyn ItemHandler>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryingItemProcessor {
    pub fn new(handler: Arc<dyn ItemHandler>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            handler,
            policy,
            clock,
        }
    }

    /// Makes exactly `max_retries + 1` attempts before giving up. Every
    /// failure, validation included, consumes one attempt.
    pub async fn process_with_retry(
        &self,
        item: &BatchItem,
        position: usize,
        max_retries: u32,
    ) -> ItemOutcome {
        let mut trace = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            match self.handler.handle(item, position).await {
                Ok(reference) => {
                    info!(
                        "Item {} succeeded on attempt {}/{}",
                        item.index,
                        attempt + 1,
                        max_retries + 1
                    );
                    return ItemOutcome::success(item.index, attempt + 1, trace, reference);
                }
                Err(e) => {
                    warn!(
                        "Item {} attempt {}/{} failed: {}",
                        item.index,
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    trace.push(RetryAttempt {
                        attempt,
                        error: e.to_string(),
                    });

                    if attempt >= max_retries {
                        let error = PipelineError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: Box::new(e),
                        };
                        return ItemOutcome::exhausted(item.index, attempt + 1, trace, &error);
                    }

                    let delay = self.policy.delay_for(attempt);
                    info!("Retrying item {} in {:?}", item.index, delay);
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
