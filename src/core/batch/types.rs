use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::PipelineError;
use crate::core::publish::PublishedReference;

pub const SKIPPED_DUE_TO_FAIL_FAST: &str = "skipped_due_to_fail_fast";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Position of the item in its source (dataset index or caller offset).
    pub index: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 0 is the initial try.
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub status: ItemStatus,
    pub attempts_made: u32,
    pub retry_trace: Vec<RetryAttempt>,
    pub published_reference: Option<PublishedReference>,
    pub terminal_error: Option<String>,
    pub retries_exhausted: bool,
}

impl ItemOutcome {
    pub fn success(
        index: usize,
        attempts_made: u32,
        retry_trace: Vec<RetryAttempt>,
        reference: PublishedReference,
    ) -> Self {
        Self {
            index,
            status: ItemStatus::Success,
            attempts_made,
            retry_trace,
            published_reference: Some(reference),
            terminal_error: None,
            retries_exhausted: false,
        }
    }

    pub fn exhausted(
        index: usize,
        attempts_made: u32,
        retry_trace: Vec<RetryAttempt>,
        error: &PipelineError,
    ) -> Self {
        Self {
            index,
            status: ItemStatus::Failed,
            attempts_made,
            retry_trace,
            published_reference: None,
            terminal_error: Some(error.to_string()),
            retries_exhausted: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    FailedFast,
}

/// Running totals of one batch. `processed == succeeded + failed` holds after
/// every folded outcome; `skipped` only grows once fail-fast triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<ItemOutcome>,
    pub skipped_items: Vec<SkippedItem>,
    pub status: BatchStatus,
    pub fail_fast_triggered_at_index: Option<usize>,
    pub success_rate: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            items: Vec::with_capacity(total),
            skipped_items: Vec::new(),
            status: BatchStatus::InProgress,
            fail_fast_triggered_at_index: None,
            success_rate: 0.0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(outcome);
    }

    pub fn skip(&mut self, index: usize) {
        self.skipped += 1;
        self.skipped_items.push(SkippedItem {
            index,
            reason: SKIPPED_DUE_TO_FAIL_FAST.to_string(),
        });
    }

    /// Skipped items never count as processed, so the rate is over the
    /// items actually attempted.
    pub fn finish(&mut self, status: BatchStatus) {
        self.status = status;
        self.success_rate = if self.processed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.processed as f64 * 100.0
        };
        self.finished_at = Some(Utc::now());
    }
}

/// Emitted once per folded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based count of items folded so far.
    pub position: usize,
    pub total: usize,
    pub index: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The batch was deliberately halted after an item exhausted its retries.
#[derive(Debug, thiserror::Error)]
#[error("batch halted at item {triggered_at_index}: {cause}")]
pub struct FailFastAbort {
    pub triggered_at_index: usize,
    pub cause: String,
    pub report: Box<BatchReport>,
}
