use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CallbackOutput, CallbackRequest, ExternalTask, PollSnapshot, TaskExecutor, TaskStatus};
use crate::core::config::OpenAiConfig;
use crate::core::error::{PipelineError, PipelineResult};

#[derive(Serialize)]
struct CreateThreadAndRun<'a> {
    assistant_id: &'a str,
    thread: NewThread<'a>,
}

#[derive(Serialize)]
struct NewThread<'a> {
    messages: Vec<NewMessage<'a>>,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct SubmitToolOutputs<'a> {
    tool_outputs: Vec<ToolOutput<'a>>,
}

#[derive(Serialize)]
struct ToolOutput<'a> {
    tool_call_id: &'a str,
    output: &'a str,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    thread_id: String,
    status: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunError>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    submit_tool_outputs: RequiredToolOutputs,
}

#[derive(Debug, Deserialize)]
struct RequiredToolOutputs {
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Deserialize)]
struct MessageText {
    value: String,
}

pub fn map_run_status(status: &str) -> Option<TaskStatus> {
    match status {
        "queued" => Some(TaskStatus::Queued),
        "in_progress" | "cancelling" => Some(TaskStatus::Running),
        "requires_action" => Some(TaskStatus::AwaitingCallback),
        "completed" => Some(TaskStatus::Completed),
        "failed" | "incomplete" => Some(TaskStatus::Failed),
        "cancelled" => Some(TaskStatus::Cancelled),
        "expired" => Some(TaskStatus::Expired),
        _ => None,
    }
}

/// Tool-call arguments are a JSON document encoded as a string.
fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Runs one assistant per task on a fresh thread through the Assistants v2
/// HTTP API. The thread is the task's session.
pub struct OpenAiAssistantsExecutor {
    client: Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    project: Option<String>,
}

impl OpenAiAssistantsExecutor {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            organization: config.organization.clone().filter(|s| !s.is_empty()),
            project: config.project.clone().filter(|s| !s.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2");
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        if let Some(project) = &self.project {
            builder = builder.header("OpenAI-Project", project);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> PipelineResult<Response> {
        let res = self.authorized(builder).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(PipelineError::Transport(format!(
                "OpenAI API error {}: {}",
                status,
                res.text().await.unwrap_or_default()
            )));
        }
        Ok(res)
    }

    async fn run_request(&self, builder: RequestBuilder) -> PipelineResult<Run> {
        let res = self.send(builder).await?;
        Ok(res.json::<Run>().await?)
    }

    fn to_task(run: &Run) -> PipelineResult<ExternalTask> {
        let status = map_run_status(&run.status).ok_or_else(|| {
            PipelineError::MalformedResponse(format!("unknown run status `{}`", run.status))
        })?;
        Ok(ExternalTask::new(&run.id, &run.thread_id, status))
    }

    async fn latest_message(&self, thread_id: &str) -> PipelineResult<Option<String>> {
        let res = self
            .send(
                self.client
                    .get(self.url(&format!("/threads/{}/messages", thread_id)))
                    .query(&[("order", "desc"), ("limit", "1")]),
            )
            .await?;
        let list: MessageList = res.json().await?;
        let text = list.data.into_iter().next().map(|m| {
            m.content
                .into_iter()
                .filter_map(|c| c.text.map(|t| t.value))
                .collect::<Vec<_>>()
                .join("\n")
        });
        Ok(text)
    }
}

fn diagnostic(run: &Run) -> String {
    if let Some(err) = &run.last_error {
        return match (&err.code, &err.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => run.status.clone(),
        };
    }
    if let Some(details) = &run.incomplete_details {
        return format!(
            "incomplete: {}",
            details.reason.as_deref().unwrap_or("unknown reason")
        );
    }
    format!("run ended as {}", run.status)
}

#[async_trait]
impl TaskExecutor for OpenAiAssistantsExecutor {
    async fn submit(&self, input: &str, executor_id: &str) -> PipelineResult<ExternalTask> {
        let body = CreateThreadAndRun {
            assistant_id: executor_id,
            thread: NewThread {
                messages: vec![NewMessage {
                    role: "user",
                    content: input,
                }],
            },
        };
        let run = self
            .run_request(self.client.post(self.url("/threads/runs")).json(&body))
            .await?;
        Self::to_task(&run)
    }

    async fn poll(&self, task: &ExternalTask) -> PipelineResult<PollSnapshot> {
        let run = self
            .run_request(self.client.get(self.url(&format!(
                "/threads/{}/runs/{}",
                task.session_id, task.task_id
            ))))
            .await?;
        let status = map_run_status(&run.status).ok_or_else(|| {
            PipelineError::MalformedResponse(format!("unknown run status `{}`", run.status))
        })?;
        debug!("Run {} is {} ({})", run.id, run.status, status);

        let snapshot = match status {
            TaskStatus::Completed => PollSnapshot {
                result: self.latest_message(&run.thread_id).await?,
                ..PollSnapshot::status(TaskStatus::Completed)
            },
            TaskStatus::AwaitingCallback => {
                let calls = run
                    .required_action
                    .map(|a| a.submit_tool_outputs.tool_calls)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| CallbackRequest {
                        arguments: parse_arguments(&call.function.arguments),
                        call_id: call.id,
                        function_name: call.function.name,
                    })
                    .collect();
                PollSnapshot::awaiting(calls)
            }
            TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Expired => {
                PollSnapshot::failed(status, diagnostic(&run))
            }
            TaskStatus::Queued | TaskStatus::Running => PollSnapshot::status(status),
        };
        Ok(snapshot)
    }

    async fn submit_callback_outputs(
        &self,
        task: &ExternalTask,
        outputs: &[CallbackOutput],
    ) -> PipelineResult<ExternalTask> {
        let body = SubmitToolOutputs {
            tool_outputs: outputs
                .iter()
                .map(|o| ToolOutput {
                    tool_call_id: &o.call_id,
                    output: &o.output,
                })
                .collect(),
        };
        let run = self
            .run_request(
                self.client
                    .post(self.url(&format!(
                        "/threads/{}/runs/{}/submit_tool_outputs",
                        task.session_id, task.task_id
                    )))
                    .json(&body),
            )
            .await?;
        Self::to_task(&run)
    }

    async fn cancel(&self, task: &ExternalTask) -> PipelineResult<()> {
        self.send(self.client.post(self.url(&format!(
            "/threads/{}/runs/{}/cancel",
            task.session_id, task.task_id
        ))))
        .await?;
        Ok(())
    }

    async fn teardown(&self, session_id: &str) -> PipelineResult<()> {
        self.send(
            self.client
                .delete(self.url(&format!("/threads/{}", session_id))),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_documented_run_status() {
        let cases = [
            ("queued", TaskStatus::Queued),
            ("in_progress", TaskStatus::Running),
            ("cancelling", TaskStatus::Running),
            ("requires_action", TaskStatus::AwaitingCallback),
            ("completed", TaskStatus::Completed),
            ("failed", TaskStatus::Failed),
            ("incomplete", TaskStatus::Failed),
            ("cancelled", TaskStatus::Cancelled),
            ("expired", TaskStatus::Expired),
        ];
        for (raw, expected) in cases {
            assert_eq!(map_run_status(raw), Some(expected), "{}", raw);
        }
        assert_eq!(map_run_status("paused"), None);
    }

    #[test]
    fn tool_arguments_fall_back_to_string() {
        assert_eq!(
            parse_arguments(r#"{"query":"tefilin"}"#),
            serde_json::json!({ "query": "tefilin" })
        );
        assert_eq!(parse_arguments("tefilin"), serde_json::json!("tefilin"));
    }

    #[test]
    fn run_diagnostic_prefers_last_error() {
        let run: Run = serde_json::from_value(serde_json::json!({
            "id": "run_1",
            "thread_id": "thread_1",
            "status": "failed",
            "last_error": { "code": "server_error", "message": "boom" }
        }))
        .unwrap();
        assert_eq!(diagnostic(&run), "server_error: boom");

        let run: Run = serde_json::from_value(serde_json::json!({
            "id": "run_2",
            "thread_id": "thread_1",
            "status": "incomplete",
            "incomplete_details": { "reason": "max_completion_tokens" }
        }))
        .unwrap();
        assert_eq!(diagnostic(&run), "incomplete: max_completion_tokens");
    }

    #[test]
    fn required_action_yields_callback_requests() {
        let run: Run = serde_json::from_value(serde_json::json!({
            "id": "run_1",
            "thread_id": "thread_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [
                        { "id": "call_1", "type": "function",
                          "function": { "name": "lookup", "arguments": "{\"query\":\"kashrout\"}" } }
                    ]
                }
            }
        }))
        .unwrap();
        let calls = run.required_action.unwrap().submit_tool_outputs.tool_calls;
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(
            parse_arguments(&calls[0].function.arguments)["query"],
            "kashrout"
        );
    }
}
