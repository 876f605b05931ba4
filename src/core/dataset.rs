use std::path::Path;
use tracing::{info, warn};

use crate::core::batch::BatchItem;
use crate::core::error::{PipelineError, PipelineResult};

/// The static list of source texts used for bulk ingestion. Positions are
/// kept as loaded so an entry's index is stable even when neighbours are
/// empty or malformed.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    entries: Vec<String>,
}

impl Dataset {
    #[cfg(test)]
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Expects a JSON array of objects carrying a `halakha` string.
    pub fn parse(raw: &str) -> PipelineResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| PipelineError::Dataset(format!("invalid JSON: {}", e)))?;
        let array = value
            .as_array()
            .ok_or_else(|| PipelineError::Dataset("expected a JSON array".to_string()))?;

        let entries = array
            .iter()
            .enumerate()
            .map(|(i, obj)| match obj.get("halakha").and_then(|h| h.as_str()) {
                Some(text) => text.to_string(),
                None => {
                    warn!("Dataset entry {} has no `halakha` text, ignored", i);
                    String::new()
                }
            })
            .collect();
        Ok(Self { entries })
    }

    pub async fn load(path: &Path) -> PipelineResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Dataset(format!("{}: {}", path.display(), e)))?;
        let dataset = Self::parse(&raw)?;
        info!(
            "Loaded dataset {} ({} valid of {} entries)",
            path.display(),
            dataset.count(),
            dataset.entries.len()
        );
        Ok(dataset)
    }

    /// Number of usable (non-blank) entries.
    pub fn count(&self) -> usize {
        self.entries.iter().filter(|e| !e.trim().is_empty()).count()
    }

    pub fn entry(&self, index: usize) -> PipelineResult<String> {
        let text = self.entries.get(index).ok_or_else(|| {
            PipelineError::Dataset(format!(
                "index {} out of range, dataset holds {} entries",
                index,
                self.entries.len()
            ))
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Dataset(format!(
                "entry {} is empty or missing",
                index
            )));
        }
        Ok(text.to_string())
    }

    /// `limit` usable entries starting at the `start`-th usable entry.
    pub fn range(&self, start: usize, limit: usize) -> PipelineResult<Vec<BatchItem>> {
        if limit == 0 {
            return Err(PipelineError::Dataset("limit must be greater than 0".into()));
        }
        let total = self.count();
        if start >= total {
            return Err(PipelineError::Dataset(format!(
                "start index {} >= available entries {}",
                start, total
            )));
        }

        Ok(self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .skip(start)
            .take(limit)
            .map(|(index, text)| BatchItem {
                index,
                content: text.trim().to_string(),
            })
            .collect())
    }

    /// Case-insensitive substring search over usable entries.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(usize, String)> {
        let needle = query.to_lowercase();
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty() && text.to_lowercase().contains(&needle))
            .take(limit)
            .map(|(i, text)| (i, text.trim().to_string()))
            .collect()
    }
}
