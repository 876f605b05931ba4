use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::LazyLock;

use crate::core::error::{PipelineError, PipelineResult};

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap());

/// Strips ASCII control characters, keeping line breaks and tabs.
pub fn sanitize(text: &str) -> String {
    CONTROL_CHARS.replace_all(text, "").into_owned()
}

/// A cited source. The extraction assistant returns either plain strings or
/// objects such as `{"name": ..., "page": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Detailed(serde_json::Map<String, serde_json::Value>),
}

impl Source {
    pub fn label(&self) -> String {
        match self {
            Source::Text(s) => s.clone(),
            Source::Detailed(map) => ["name", "title", "source"]
                .iter()
                .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| serde_json::Value::Object(map.clone()).to_string()),
        }
    }

    fn sanitized(self) -> Self {
        match self {
            Source::Text(s) => Source::Text(sanitize(&s)),
            Source::Detailed(map) => Source::Detailed(
                map.into_iter()
                    .map(|(k, v)| match v {
                        serde_json::Value::String(s) => (k, serde_json::Value::String(sanitize(&s))),
                        other => (k, other),
                    })
                    .collect(),
            ),
        }
    }
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// What the extraction stage returns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuredFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_level")]
    pub difficulty_level: Option<i64>,
}

/// Finds the JSON document inside an assistant reply: a fenced ```json block,
/// a bare document, or the outermost object embedded in prose.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    }
}

impl StructuredFields {
    pub fn parse(reply: &str) -> PipelineResult<Self> {
        let json = extract_json_block(reply).ok_or_else(|| {
            PipelineError::MalformedResponse("no JSON object in extraction reply".to_string())
        })?;
        let fields: StructuredFields = serde_json::from_str(json)?;
        if fields.answer.trim().is_empty() {
            return Err(PipelineError::MalformedResponse(
                "extraction reply has no `answer`".to_string(),
            ));
        }
        if fields.question.trim().is_empty() {
            return Err(PipelineError::MalformedResponse(
                "extraction reply has no `question`".to_string(),
            ));
        }
        Ok(fields)
    }
}

/// The merged, sanitised outcome of the three stages for one content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub title: String,
    pub question: String,
    pub answer: String,
    pub content: String,
    pub sources: Vec<Source>,
    pub themes: Vec<String>,
    pub tags: Vec<String>,
    pub difficulty_level: Option<i64>,
    pub social_text: String,
    pub social_caption: String,
}

impl ProcessedRecord {
    pub fn assemble(
        fields: StructuredFields,
        content: &str,
        social_text: &str,
        social_caption: &str,
    ) -> Self {
        let clean_all = |v: Vec<String>| v.iter().map(|s| sanitize(s)).collect::<Vec<_>>();
        Self {
            title: sanitize(&fields.title),
            question: sanitize(&fields.question),
            answer: sanitize(&fields.answer),
            content: sanitize(content),
            sources: fields.sources.into_iter().map(Source::sanitized).collect(),
            themes: clean_all(fields.themes),
            tags: clean_all(fields.tags),
            difficulty_level: fields.difficulty_level,
            social_text: sanitize(social_text.trim()),
            social_caption: sanitize(social_caption.trim()),
        }
    }
}
