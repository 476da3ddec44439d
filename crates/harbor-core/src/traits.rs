use async_trait::async_trait;

use crate::error::Result;
use crate::index::{Filter, IndexPoint, IndexSpec, ScoredPoint, VectorQuery};
use crate::plugin::{PluginResult, PluginRun};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// A configured compute plugin instance (embedding or classification).
pub trait ComputePlugin: Send + Sync {
    fn instance_name(&self) -> &str;
    fn plugin_type(&self) -> &str;
    fn version(&self) -> &str {
        "1.0"
    }
    /// Length of the feature vectors produced, if the plugin embeds.
    fn embedding_size(&self) -> Option<usize> {
        None
    }
    fn call(&self, run: &PluginRun) -> Result<PluginResult>;
}

#[async_trait]
pub trait IndexerPlugin: Send + Sync {
    async fn get_indexes(&self, collection: &str) -> Result<Option<Vec<IndexSpec>>>;
    async fn create_collection(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()>;
    async fn delete_collection(&self, collection: &str) -> Result<bool>;
    async fn list_collections(&self) -> Result<Vec<String>>;
    /// Upsert; an existing id is replaced as a whole.
    async fn add_points(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()>;
    /// Empty `queries` means a filtered scan where every hit scores 1.
    async fn search(
        &self,
        collection: &str,
        queries: &[VectorQuery],
        filters: &[Filter],
        size: usize,
    ) -> Result<Vec<ScoredPoint>>;
}
