//! Sequential bulk processing with per-item retries and fail-fast.

pub(crate) mod retry;
mod types;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::core::clock::Clock;

pub use retry::{PipelineItemHandler, RetryPolicy, RetryingItemProcessor};
pub use types::{
    BatchItem, BatchProgress, BatchReport, BatchStatus, FailFastAbort, ItemOutcome, RetryAttempt,
};

/// Folds items through the retrying processor strictly in input order.
pub struct BatchOrchestrator {
    processor: RetryingItemProcessor,
    clock: Arc<dyn Clock>,
    item_pause: Duration,
    progress: Option<mpsc::Sender<BatchProgress>>,
}

impl BatchOrchestrator {
    pub fn new(processor: RetryingItemProcessor, clock: Arc<dyn Clock>, item_pause: Duration) -> Self {
        Self {
            processor,
            clock,
            item_pause,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<BatchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Raw contents numbered from `start_offset`.
    pub async fn process_batch(
        &self,
        contents: Vec<String>,
        start_offset: usize,
        max_retries: u32,
        fail_fast: bool,
    ) -> Result<BatchReport, FailFastAbort> {
        let items = contents
            .into_iter()
            .enumerate()
            .map(|(i, content)| BatchItem {
                index: start_offset + i,
                content,
            })
            .collect();
        self.run_batch(items, max_retries, fail_fast).await
    }

    /// Returns the report on normal completion, even when items failed. With
    /// `fail_fast`, the first exhausted item halts the batch and every item
    /// after it is reported as skipped inside the returned `FailFastAbort`.
    pub async fn run_batch(
        &self,
        items: Vec<BatchItem>,
        max_retries: u32,
        fail_fast: bool,
    ) -> Result<BatchReport, FailFastAbort> {
        let total = items.len();
        let mut report = BatchReport::new(total);
        info!(
            "Starting batch of {} item(s), max_retries={}, fail_fast={}",
            total, max_retries, fail_fast
        );

        for (position, item) in items.iter().enumerate() {
            let outcome = self
                .processor
                .process_with_retry(item, position, max_retries)
                .await;
            let succeeded = outcome.is_success();
            let halt = fail_fast && outcome.retries_exhausted;
            let cause = outcome.terminal_error.clone().unwrap_or_default();
            report.record(outcome);
            self.emit(&report, position, item.index).await;

            if halt {
                for rest in &items[position + 1..] {
                    report.skip(rest.index);
                }
                report.fail_fast_triggered_at_index = Some(item.index);
                report.finish(BatchStatus::FailedFast);
                error!(
                    "Fail-fast triggered at item {}, {} item(s) skipped",
                    item.index, report.skipped
                );
                return Err(FailFastAbort {
                    triggered_at_index: item.index,
                    cause,
                    report: Box::new(report),
                });
            }

            if succeeded && position + 1 < total {
                self.clock.sleep(self.item_pause).await;
            }
        }

        report.finish(BatchStatus::Completed);
        info!(
            "Batch completed: {}/{} succeeded ({:.1}%)",
            report.succeeded, report.processed, report.success_rate
        );
        Ok(report)
    }

    async fn emit(&self, report: &BatchReport, position: usize, index: usize) {
        let Some(tx) = &self.progress else {
            return;
        };
        let progress = BatchProgress {
            position: position + 1,
            total: report.total,
            index,
            succeeded: report.succeeded,
            failed: report.failed,
        };
        if tx.send(progress).await.is_err() {
            debug!("Batch progress receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests;
