use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::assistant::RunOptions;
use crate::core::batch::RetryPolicy;

pub const CONFIG_ENV: &str = "HALAKHA_CONFIG";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub extraction_assistant: String,
    pub post_assistant: String,
    pub caption_assistant: String,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            organization: None,
            project: None,
            extraction_assistant: String::new(),
            post_assistant: String::new(),
            caption_assistant: String::new(),
            timeout_secs: 300,
            poll_interval_ms: 4000,
        }
    }
}

impl OpenAiConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotionConfig {
    pub api_token: String,
    pub database_id: String,
    pub base_url: String,
    pub version: String,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            database_id: String::new(),
            base_url: "https://api.notion.com/v1".to_string(),
            version: "2022-06-28".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_retries: u32,
    pub retry_delays_ms: Vec<u64>,
    pub item_pause_ms: u64,
    pub fail_fast: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delays_ms: vec![1000, 2000, 4000, 8000, 16000],
            item_pause_ms: 1000,
            fail_fast: true,
        }
    }
}

impl BatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }

    pub fn item_pause(&self) -> Duration {
        Duration::from_millis(self.item_pause_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("halakhot.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub dir: Option<PathBuf>,
    pub base_url: Option<String>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("halakha-pipeline").join("config.toml"))
}

impl AppConfig {
    /// `explicit` wins over `$HALAKHA_CONFIG`, which wins over the per-user
    /// config directory. Environment credentials are applied last.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => Some(PathBuf::from(p)),
                _ => default_config_path(),
            },
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let config: AppConfig = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", path.display()))?;
                info!("Loaded config from {}", path.display());
                config
            }
            Some(path) if explicit.is_some() => {
                bail!("config file {} does not exist", path.display())
            }
            _ => {
                info!("No config file found, using defaults.");
                AppConfig::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = get("OPENAI_ORGANIZATION_ID") {
            self.openai.organization = Some(v);
        }
        if let Some(v) = get("OPENAI_PROJECT_ID") {
            self.openai.project = Some(v);
        }
        if let Some(v) = get("ASST_HALAKHA") {
            self.openai.extraction_assistant = v;
        }
        if let Some(v) = get("ASST_INSTA_POST") {
            self.openai.post_assistant = v;
        }
        if let Some(v) = get("ASST_LEGEND_POST") {
            self.openai.caption_assistant = v;
        }
        if let Some(v) = get("NOTION_API_TOKEN") {
            self.notion.api_token = v;
        }
        if let Some(v) = get("NOTION_DATABASE_ID_POST_HALAKHA") {
            self.notion.database_id = v;
        }
    }

    /// Checked before the server or a processing command starts.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("openai.api_key", &self.openai.api_key),
            ("openai.extraction_assistant", &self.openai.extraction_assistant),
            ("openai.post_assistant", &self.openai.post_assistant),
            ("openai.caption_assistant", &self.openai.caption_assistant),
            ("notion.api_token", &self.notion.api_token),
            ("notion.database_id", &self.notion.database_id),
        ] {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if !missing.is_empty() {
            bail!("missing required settings: {}", missing.join(", "));
        }

        url::Url::parse(&self.openai.base_url)
            .with_context(|| format!("openai.base_url `{}`", self.openai.base_url))?;
        url::Url::parse(&self.notion.base_url)
            .with_context(|| format!("notion.base_url `{}`", self.notion.base_url))?;
        if let Some(base) = &self.assets.base_url {
            url::Url::parse(base).with_context(|| format!("assets.base_url `{}`", base))?;
        }

        if self.batch.retry_delays_ms.is_empty() {
            bail!("batch.retry_delays_ms must not be empty");
        }
        if self.openai.poll_interval_ms == 0 {
            bail!("openai.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> AppConfig {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("ASST_HALAKHA", "asst_h"),
            ("ASST_INSTA_POST", "asst_p"),
            ("ASST_LEGEND_POST", "asst_l"),
            ("NOTION_API_TOKEN", "secret_n"),
            ("NOTION_DATABASE_ID_POST_HALAKHA", "db_1"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.openai.timeout_secs, 300);
        assert_eq!(config.openai.poll_interval_ms, 4000);
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(
            config.batch.retry_delays_ms,
            vec![1000, 2000, 4000, 8000, 16000]
        );
        assert!(config.batch.fail_fast);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9001

            [batch]
            retry_delays_ms = [0]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.batch.retry_delays_ms, vec![0]);
        assert_eq!(config.batch.item_pause_ms, 1000);
        assert_eq!(config.notion.version, "2022-06-28");
    }

    #[test]
    fn env_overrides_credentials() {
        let config = complete();
        assert_eq!(config.openai.api_key, "sk-test");
        assert_eq!(config.openai.caption_assistant, "asst_l");
        assert_eq!(config.notion.database_id, "db_1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_reports_missing_credentials() {
        let err = AppConfig::default().validate().unwrap_err().to_string();
        assert!(err.contains("openai.api_key"), "{}", err);
        assert!(err.contains("notion.database_id"), "{}", err);
    }

    #[test]
    fn validate_rejects_bad_urls_and_empty_delays() {
        let mut config = complete();
        config.notion.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = complete();
        config.batch.retry_delays_ms.clear();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[openai]\ntimeout_secs = 5\n").unwrap();

        let config = AppConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.openai.timeout_secs, 5);
        assert_eq!(config.openai.run_options().timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn load_fails_for_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(AppConfig::load(Some(&path)).await.is_err());
    }
}
