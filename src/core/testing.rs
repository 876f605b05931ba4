//! Scripted fakes shared by the unit test suites.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::assistant::{
    CallbackOutput, CallbackRequest, ExternalTask, PollSnapshot, TaskExecutor, TaskStatus,
};
use crate::core::batch::BatchItem;
use crate::core::batch::retry::ItemHandler;
use crate::core::clock::Clock;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::pipeline::ProcessedRecord;
use crate::core::publish::{AssetLocator, AssetReference, PublishedReference, Publisher};

/// Clock whose time only moves when something sleeps on it.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct ExecutorLog {
    next_id: usize,
    task_executor: HashMap<String, String>,
    scripts: HashMap<String, VecDeque<PollSnapshot>>,
    submits: Vec<(String, String)>,
    outputs: Vec<(String, Vec<CallbackOutput>)>,
    cancels: Vec<String>,
    cancelled: HashSet<String>,
    teardowns: Vec<String>,
}

/// Executor that replays a queue of snapshots per executor id. The last
/// snapshot of a queue repeats forever.
#[derive(Default)]
pub struct ScriptedExecutor {
    log: Mutex<ExecutorLog>,
    honour_cancel: bool,
    fail_teardown: bool,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// After `cancel`, polls report `cancelled`.
    pub fn honouring_cancel(mut self) -> Self {
        self.honour_cancel = true;
        self
    }

    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    pub fn script(self, executor_id: &str, snapshots: Vec<PollSnapshot>) -> Self {
        self.log
            .lock()
            .unwrap()
            .scripts
            .insert(executor_id.to_string(), snapshots.into());
        self
    }

    pub fn submits(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().submits.clone()
    }

    pub fn submitted_outputs(&self) -> Vec<(String, Vec<CallbackOutput>)> {
        self.log.lock().unwrap().outputs.clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.log.lock().unwrap().cancels.clone()
    }

    pub fn teardowns(&self) -> Vec<String> {
        self.log.lock().unwrap().teardowns.clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn submit(&self, input: &str, executor_id: &str) -> PipelineResult<ExternalTask> {
        let mut log = self.log.lock().unwrap();
        log.next_id += 1;
        let task_id = format!("run_{}", log.next_id);
        let session_id = format!("thread_{}", log.next_id);
        log.task_executor
            .insert(task_id.clone(), executor_id.to_string());
        log.submits.push((input.to_string(), executor_id.to_string()));
        Ok(ExternalTask::new(task_id, session_id, TaskStatus::Queued))
    }

    async fn poll(&self, task: &ExternalTask) -> PipelineResult<PollSnapshot> {
        let mut log = self.log.lock().unwrap();
        if log.cancelled.contains(&task.task_id) {
            return Ok(PollSnapshot::status(TaskStatus::Cancelled));
        }
        let executor_id = log
            .task_executor
            .get(&task.task_id)
            .cloned()
            .unwrap_or_default();
        let snapshot = match log.scripts.get_mut(&executor_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(snapshot.unwrap_or_else(|| PollSnapshot::status(TaskStatus::Running)))
    }

    async fn submit_callback_outputs(
        &self,
        task: &ExternalTask,
        outputs: &[CallbackOutput],
    ) -> PipelineResult<ExternalTask> {
        let mut log = self.log.lock().unwrap();
        log.outputs.push((task.task_id.clone(), outputs.to_vec()));
        let mut updated = task.clone();
        updated.status = TaskStatus::Running;
        Ok(updated)
    }

    async fn cancel(&self, task: &ExternalTask) -> PipelineResult<()> {
        let mut log = self.log.lock().unwrap();
        log.cancels.push(task.task_id.clone());
        if self.honour_cancel {
            log.cancelled.insert(task.task_id.clone());
        }
        Ok(())
    }

    async fn teardown(&self, session_id: &str) -> PipelineResult<()> {
        self.log
            .lock()
            .unwrap()
            .teardowns
            .push(session_id.to_string());
        if self.fail_teardown {
            return Err(PipelineError::Transport("thread delete refused".into()));
        }
        Ok(())
    }
}

pub fn callback(call_id: &str, function_name: &str, arguments: serde_json::Value) -> CallbackRequest {
    CallbackRequest {
        call_id: call_id.to_string(),
        function_name: function_name.to_string(),
        arguments,
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(ProcessedRecord, i64, Option<AssetReference>)>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(ProcessedRecord, i64, Option<AssetReference>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        record: ProcessedRecord,
        schedule_offset_days: i64,
        asset: Option<&AssetReference>,
    ) -> PipelineResult<PublishedReference> {
        if self.fail {
            return Err(PipelineError::Publish("database unavailable".into()));
        }
        let mut published = self.published.lock().unwrap();
        published.push((record, schedule_offset_days, asset.cloned()));
        let page_id = format!("page-{}", published.len());
        Ok(PublishedReference {
            url: format!("https://notion.test/{}", page_id),
            page_id,
        })
    }
}

pub struct FixedAssetLocator(pub PipelineResult<Option<AssetReference>>);

#[async_trait]
impl AssetLocator for FixedAssetLocator {
    async fn latest(&self) -> PipelineResult<Option<AssetReference>> {
        match &self.0 {
            Ok(asset) => Ok(asset.clone()),
            Err(e) => Err(PipelineError::Publish(e.to_string())),
        }
    }
}

/// Item handler that fails the first `failures` attempts of listed indices
/// (`u32::MAX` means always).
#[derive(Default)]
pub struct FlakyHandler {
    failures: HashMap<usize, u32>,
    calls: Mutex<Vec<(usize, usize)>>,
}

impl FlakyHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, index: usize, failures: u32) -> Self {
        self.failures.insert(index, failures);
        self
    }

    /// `(index, position)` for every call, in order.
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, index: usize) -> usize {
        self.calls().iter().filter(|(i, _)| *i == index).count()
    }
}

#[async_trait]
impl ItemHandler for FlakyHandler {
    async fn handle(&self, item: &BatchItem, position: usize) -> PipelineResult<PublishedReference> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((item.index, position));
            calls.iter().filter(|(i, _)| *i == item.index).count() as u32
        };
        if let Some(failures) = self.failures.get(&item.index)
            && attempt <= *failures
        {
            return Err(PipelineError::task(
                &format!("run_{}", item.index),
                TaskStatus::Failed,
                format!("attempt {} rejected", attempt),
            ));
        }
        Ok(PublishedReference {
            page_id: format!("page-{}", item.index),
            url: format!("https://notion.test/page-{}", item.index),
        })
    }
}

pub fn items(n: usize) -> Vec<BatchItem> {
    (0..n)
        .map(|index| BatchItem {
            index,
            content: format!("halakha #{}", index),
        })
        .collect()
}
