use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use super::{AssetLocator, AssetReference};
use crate::core::error::{PipelineError, PipelineResult};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Most recently modified image in a folder, served from `base_url`.
pub struct LatestAssetLocator {
    dir: PathBuf,
    base_url: String,
}

impl LatestAssetLocator {
    pub fn new(dir: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AssetLocator for LatestAssetLocator {
    async fn latest(&self) -> PipelineResult<Option<AssetReference>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            PipelineError::Publish(format!("asset dir {}: {}", self.dir.display(), e))
        })?;

        let mut newest: Option<(SystemTime, String)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::Publish(e.to_string()))?
        {
            let path = entry.path();
            if !is_image(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, name.to_string()));
            }
        }

        Ok(newest.map(|(_, name)| {
            debug!("Latest asset is {}", name);
            AssetReference {
                url: format!("{}/{}", self.base_url, name),
                name,
            }
        }))
    }
}
