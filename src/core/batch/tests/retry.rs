//! Retry budget, backoff schedule and per-item outcomes.

use std::sync::Arc;
use std::time::Duration;

use crate::core::assistant::{CallbackRegistry, PollSnapshot, RunOptions, TaskRunner};
use crate::core::batch::types::ItemStatus;
use crate::core::batch::{BatchItem, PipelineItemHandler, RetryPolicy, RetryingItemProcessor};
use crate::core::pipeline::{ContentPipeline, StageAssistants};
use crate::core::testing::{FlakyHandler, ManualClock, RecordingPublisher, ScriptedExecutor, items};

fn secs(list: &[u64]) -> Vec<Duration> {
    list.iter().map(|s| Duration::from_secs(*s)).collect()
}

fn processor(handler: Arc<FlakyHandler>, clock: Arc<ManualClock>) -> RetryingItemProcessor {
    RetryingItemProcessor::new(handler, RetryPolicy::default(), clock)
}

#[test]
fn default_schedule_doubles_and_clamps() {
    let policy = RetryPolicy::default();
    let delays: Vec<Duration> = (0..7).map(|a| policy.delay_for(a)).collect();
    assert_eq!(delays, secs(&[1, 2, 4, 8, 16, 16, 16]));
}

#[test]
fn empty_schedule_means_no_wait() {
    let policy = RetryPolicy::new(Vec::new());
    assert_eq!(policy.delay_for(3), Duration::ZERO);
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let handler = Arc::new(FlakyHandler::new().failing(0, 2));
    let clock = Arc::new(ManualClock::new());
    let item = &items(1)[0];

    let outcome = processor(handler.clone(), clock.clone())
        .process_with_retry(item, 0, 3)
        .await;

    assert_eq!(outcome.status, ItemStatus::Success);
    assert_eq!(outcome.attempts_made, 3);
    assert!(!outcome.retries_exhausted);
    let attempts: Vec<u32> = outcome.retry_trace.iter().map(|t| t.attempt).collect();
    assert_eq!(attempts, vec![0, 1]);
    assert_eq!(outcome.published_reference.unwrap().page_id, "page-0");
    assert_eq!(clock.sleeps(), secs(&[1, 2]));
}

#[tokio::test]
async fn exhausts_after_exactly_max_retries_plus_one() {
    for max_retries in [0u32, 1, 3, 6] {
        let handler = Arc::new(FlakyHandler::new().failing(0, u32::MAX));
        let clock = Arc::new(ManualClock::new());
        let item = &items(1)[0];

        let outcome = processor(handler.clone(), clock.clone())
            .process_with_retry(item, 0, max_retries)
            .await;

        assert_eq!(outcome.status, ItemStatus::Failed);
        assert!(outcome.retries_exhausted);
        assert_eq!(outcome.attempts_made, max_retries + 1);
        assert_eq!(handler.attempts_for(0), (max_retries + 1) as usize);
        assert_eq!(outcome.retry_trace.len(), (max_retries + 1) as usize);
        assert!(outcome.published_reference.is_none());
        let err = outcome.terminal_error.unwrap();
        assert!(
            err.contains(&format!("gave up after {} attempts", max_retries + 1)),
            "{}",
            err
        );
        assert_eq!(clock.sleeps().len(), max_retries as usize);
    }
}

#[tokio::test]
async fn long_budgets_wait_at_the_last_delay() {
    let handler = Arc::new(FlakyHandler::new().failing(0, u32::MAX));
    let clock = Arc::new(ManualClock::new());

    processor(handler, clock.clone())
        .process_with_retry(&items(1)[0], 0, 6)
        .await;

    assert_eq!(clock.sleeps(), secs(&[1, 2, 4, 8, 16, 16]));
}

#[tokio::test]
async fn empty_content_consumes_the_whole_budget() {
    let executor = Arc::new(ScriptedExecutor::new());
    let clock = Arc::new(ManualClock::new());
    let runner = TaskRunner::new(
        executor.clone(),
        Arc::new(CallbackRegistry::new()),
        clock.clone(),
    );
    let pipeline = ContentPipeline::new(
        runner,
        StageAssistants {
            extraction: "e".into(),
            post: "p".into(),
            caption: "c".into(),
        },
        RunOptions::default(),
        Arc::new(RecordingPublisher::new()),
    );
    let handler = Arc::new(PipelineItemHandler::new(pipeline, 0, false));
    let processor = RetryingItemProcessor::new(handler, RetryPolicy::default(), clock.clone());

    let item = BatchItem {
        index: 7,
        content: "   ".into(),
    };
    let outcome = processor.process_with_retry(&item, 0, 2).await;

    assert_eq!(outcome.index, 7);
    assert_eq!(outcome.attempts_made, 3);
    assert!(outcome.retries_exhausted);
    assert!(outcome.retry_trace[0].error.contains("content is empty"));
    assert!(executor.submits().is_empty());
    assert_eq!(clock.sleeps(), secs(&[1, 2]));
}

#[tokio::test]
async fn schedule_offset_saturates_instead_of_overflowing() {
    let clock = Arc::new(ManualClock::new());
    let executor = Arc::new(
        ScriptedExecutor::new()
            .script(
                "e",
                vec![PollSnapshot::completed(r#"{"question": "Q", "answer": "A"}"#)],
            )
            .script("p", vec![PollSnapshot::completed("post")])
            .script("c", vec![PollSnapshot::completed("legend")]),
    );
    let runner = TaskRunner::new(executor, Arc::new(CallbackRegistry::new()), clock.clone());
    let publisher = Arc::new(RecordingPublisher::new());
    let pipeline = ContentPipeline::new(
        runner,
        StageAssistants {
            extraction: "e".into(),
            post: "p".into(),
            caption: "c".into(),
        },
        RunOptions::default(),
        publisher.clone(),
    );
    let handler = Arc::new(PipelineItemHandler::new(pipeline, i64::MAX, false));
    let processor = RetryingItemProcessor::new(handler, RetryPolicy::default(), clock);

    let item = BatchItem {
        index: 0,
        content: "texte".into(),
    };
    let outcome = processor.process_with_retry(&item, 3, 0).await;

    assert!(outcome.is_success());
    assert_eq!(publisher.published()[0].1, i64::MAX);
}
