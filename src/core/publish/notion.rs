use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{AssetReference, PublishedReference, Publisher};
use crate::core::config::NotionConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::pipeline::ProcessedRecord;

/// Notion rejects rich-text blocks longer than this.
const RICH_TEXT_LIMIT: usize = 2000;

fn truncate_rich_text(field: &str, text: &str) -> String {
    if text.chars().count() <= RICH_TEXT_LIMIT {
        return text.to_string();
    }
    warn!("Field `{}` exceeds {} characters, truncating", field, RICH_TEXT_LIMIT);
    let mut cut: String = text.chars().take(RICH_TEXT_LIMIT - 3).collect();
    cut.push_str("...");
    cut
}

pub(crate) fn build_properties(
    record: &ProcessedRecord,
    schedule_offset_days: i64,
    asset: Option<&AssetReference>,
    now: DateTime<Utc>,
) -> PipelineResult<Value> {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "question".into(),
        json!({ "title": [{ "text": { "content": record.question } }] }),
    );

    for (key, text) in [
        ("text_post", &record.social_text),
        ("legend", &record.social_caption),
        ("content", &record.content),
    ] {
        if text.is_empty() {
            continue;
        }
        properties.insert(
            key.into(),
            json!({ "rich_text": [{ "text": { "content": truncate_rich_text(key, text) } }] }),
        );
    }

    if let Some(asset) = asset {
        properties.insert(
            "Image".into(),
            json!({ "files": [{ "name": asset.name, "external": { "url": asset.url } }] }),
        );
    }

    let date = Duration::try_days(schedule_offset_days)
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or_else(|| {
            PipelineError::Validation(format!(
                "schedule offset of {} days is out of range",
                schedule_offset_days
            ))
        })?;
    properties.insert(
        "date_post".into(),
        json!({ "date": { "start": date.to_rfc3339() } }),
    );
    Ok(Value::Object(properties))
}

#[derive(Deserialize)]
struct CreatedPage {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

/// Creates one page per record in the configured Notion database.
pub struct NotionPublisher {
    client: Client,
    api_token: String,
    database_id: String,
    base_url: String,
    version: String,
}

impl NotionPublisher {
    pub fn new(config: &NotionConfig) -> Self {
        Self {
            client: Client::new(),
            api_token: config.api_token.clone(),
            database_id: config.database_id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            version: config.version.clone(),
        }
    }
}

#[async_trait]
impl Publisher for NotionPublisher {
    async fn publish(
        &self,
        record: ProcessedRecord,
        schedule_offset_days: i64,
        asset: Option<&AssetReference>,
    ) -> PipelineResult<PublishedReference> {
        if record.question.trim().is_empty() {
            return Err(PipelineError::Publish("record has no question".into()));
        }
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": build_properties(&record, schedule_offset_days, asset, Utc::now())?,
        });

        let res = self
            .client
            .post(format!("{}/pages", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Notion-Version", &self.version)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(PipelineError::Publish(format!(
                "Notion API error {}: {}",
                status,
                res.text().await.unwrap_or_default()
            )));
        }

        let page: CreatedPage = res.json().await?;
        let url = page
            .url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("https://www.notion.so/{}", page.id.replace('-', "")));
        info!("Notion page {} created (+{} days)", page.id, schedule_offset_days);
        Ok(PublishedReference {
            page_id: page.id,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessedRecord {
        ProcessedRecord {
            title: "Titre".into(),
            question: "Peut-on ?".into(),
            answer: "Oui.".into(),
            content: "x".repeat(2500),
            sources: vec![],
            themes: vec![],
            tags: vec![],
            difficulty_level: Some(1),
            social_text: "Post".into(),
            social_caption: String::new(),
        }
    }

    #[test]
    fn long_rich_text_is_truncated_to_limit() {
        let props = build_properties(&record(), 0, None, Utc::now()).unwrap();
        let content = props["content"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(content.chars().count(), 2000);
        assert!(content.ends_with("..."));
        assert_eq!(
            props["text_post"]["rich_text"][0]["text"]["content"],
            "Post"
        );
        assert!(props.get("legend").is_none());
        assert!(props.get("Image").is_none());
    }

    #[test]
    fn schedule_offset_moves_publication_date() {
        let now = DateTime::parse_from_rfc3339("2025-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let props = build_properties(&record(), 3, None, now).unwrap();
        let start = props["date_post"]["date"]["start"].as_str().unwrap();
        assert!(start.starts_with("2025-03-04T08:00:00"), "{}", start);
    }

    #[test]
    fn asset_becomes_external_image() {
        let asset = AssetReference {
            name: "latest.png".into(),
            url: "https://cdn.test/latest.png".into(),
        };
        let props = build_properties(&record(), 0, Some(&asset), Utc::now()).unwrap();
        assert_eq!(
            props["Image"]["files"][0]["external"]["url"],
            "https://cdn.test/latest.png"
        );
        assert_eq!(props["question"]["title"][0]["text"]["content"], "Peut-on ?");
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        for days in [1_000_000_000_000, i64::MIN] {
            let err = build_properties(&record(), days, None, Utc::now()).unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)), "{}", days);
        }
        let err = build_properties(&record(), 200_000_000, None, Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
