//! Downstream publishing: the document store and the optional image asset.

pub mod assets;
pub mod notion;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::PipelineResult;
use crate::core::pipeline::ProcessedRecord;

pub use assets::LatestAssetLocator;
pub use notion::NotionPublisher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedReference {
    pub page_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    pub name: String,
    pub url: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Commits the record, scheduled `schedule_offset_days` from now.
    async fn publish(
        &self,
        record: ProcessedRecord,
        schedule_offset_days: i64,
        asset: Option<&AssetReference>,
    ) -> PipelineResult<PublishedReference>;
}

#[async_trait]
pub trait AssetLocator: Send + Sync {
    async fn latest(&self) -> PipelineResult<Option<AssetReference>>;
}
