use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{CallbackOutput, CallbackRequest};
use crate::core::dataset::Dataset;

/// A local function the external task may ask us to run mid-flight.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, arguments: &serde_json::Value) -> Result<String>;
}

/// A handler failure. Encoded into the callback output so the external task
/// can react to it; never returned to the caller of the runner.
#[derive(Debug, thiserror::Error)]
#[error("callback `{function_name}` failed: {message}")]
pub struct CallbackHandlerError {
    pub function_name: String,
    pub message: String,
}

impl CallbackHandlerError {
    pub fn to_output(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<String, Arc<dyn CallbackHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `current_date` and, when a dataset is available, `lookup`.
    pub fn with_builtins(dataset: Option<Arc<Dataset>>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CurrentDateHandler));
        if let Some(dataset) = dataset {
            registry.register(Arc::new(DatasetLookupHandler::new(dataset)));
        }
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn CallbackHandler>) {
        info!("Registering callback handler: {}", handler.name());
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, request: &CallbackRequest) -> CallbackOutput {
        let output = match self.handlers.get(&request.function_name) {
            Some(handler) => match handler.call(&request.arguments).await {
                Ok(out) => out,
                Err(e) => {
                    let err = CallbackHandlerError {
                        function_name: request.function_name.clone(),
                        message: e.to_string(),
                    };
                    warn!("Callback {} failed: {}", request.call_id, err);
                    err.to_output()
                }
            },
            None => {
                let err = CallbackHandlerError {
                    function_name: request.function_name.clone(),
                    message: "no handler registered".to_string(),
                };
                warn!("Callback {} has no handler: {}", request.call_id, err);
                err.to_output()
            }
        };
        CallbackOutput {
            call_id: request.call_id.clone(),
            output,
        }
    }

    /// Resolve every request in order; one output per request.
    pub async fn resolve_all(&self, requests: &[CallbackRequest]) -> Vec<CallbackOutput> {
        let mut outputs = Vec::with_capacity(requests.len());
        for request in requests {
            outputs.push(self.dispatch(request).await);
        }
        outputs
    }
}

pub struct CurrentDateHandler;

#[async_trait]
impl CallbackHandler for CurrentDateHandler {
    fn name(&self) -> &str {
        "current_date"
    }

    async fn call(&self, _arguments: &serde_json::Value) -> Result<String> {
        Ok(chrono::Utc::now().date_naive().to_string())
    }
}

const LOOKUP_EXCERPT_CHARS: usize = 400;

/// Searches the static dataset for entries containing `query`.
pub struct DatasetLookupHandler {
    dataset: Arc<Dataset>,
}

impl DatasetLookupHandler {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self { dataset }
    }
}

#[async_trait]
impl CallbackHandler for DatasetLookupHandler {
    fn name(&self) -> &str {
        "lookup"
    }

    async fn call(&self, arguments: &serde_json::Value) -> Result<String> {
        let query = match arguments {
            serde_json::Value::String(s) => s.as_str(),
            other => other
                .get("query")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("missing `query` argument"))?,
        };
        if query.trim().is_empty() {
            anyhow::bail!("`query` must not be empty");
        }
        let limit = arguments
            .get("limit")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(3)
            .clamp(1, 10) as usize;

        let hits: Vec<serde_json::Value> = self
            .dataset
            .search(query, limit)
            .into_iter()
            .map(|(index, text)| {
                let excerpt: String = text.chars().take(LOOKUP_EXCERPT_CHARS).collect();
                serde_json::json!({ "index": index, "excerpt": excerpt })
            })
            .collect();
        Ok(serde_json::json!({ "matches": hits }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl CallbackHandler for Failing {
        fn name(&self) -> &str {
            "lookup"
        }

        async fn call(&self, _arguments: &serde_json::Value) -> Result<String> {
            anyhow::bail!("index unavailable")
        }
    }

    fn request(call_id: &str, function_name: &str) -> CallbackRequest {
        CallbackRequest {
            call_id: call_id.to_string(),
            function_name: function_name.to_string(),
            arguments: serde_json::json!({ "query": "shabbat" }),
        }
    }

    #[tokio::test]
    async fn failing_handler_is_encoded_as_output() {
        let mut registry = CallbackRegistry::new();
        registry.register(Arc::new(Failing));

        let out = registry.dispatch(&request("call_1", "lookup")).await;
        assert_eq!(out.call_id, "call_1");
        let parsed: serde_json::Value = serde_json::from_str(&out.output).unwrap();
        let msg = parsed["error"].as_str().unwrap();
        assert!(msg.contains("index unavailable"), "got: {}", msg);
    }

    #[tokio::test]
    async fn unknown_function_is_encoded_as_output() {
        let registry = CallbackRegistry::new();
        let out = registry.dispatch(&request("call_2", "missing")).await;
        assert!(out.output.contains("no handler registered"));
    }

    #[tokio::test]
    async fn lookup_returns_matching_entries() {
        let dataset = Arc::new(Dataset::from_entries(vec![
            "Les lois de Shabbat".to_string(),
            "Netilat yadaim le matin".to_string(),
        ]));
        let registry = CallbackRegistry::with_builtins(Some(dataset));
        assert_eq!(registry.names(), vec!["current_date", "lookup"]);

        let out = registry.dispatch(&request("call_3", "lookup")).await;
        let parsed: serde_json::Value = serde_json::from_str(&out.output).unwrap();
        let matches = parsed["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["index"], 0);
    }

    #[tokio::test]
    async fn resolve_all_keeps_request_order() {
        let registry = CallbackRegistry::with_builtins(None);
        let outputs = registry
            .resolve_all(&[request("a", "current_date"), request("b", "nope")])
            .await;
        let ids: Vec<&str> = outputs.iter().map(|o| o.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
