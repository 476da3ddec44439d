use std::sync::Arc;
use tracing::info;

use harbor_core::config::AppConfig;
use harbor_core::{PluginConfig, Result};
use harbor_data::DataManager;
use harbor_index::CollectionManager;
use harbor_plugins::{register_all, ComputePluginManager, InferenceManager, Registries};

use crate::indexing::run_indexing;
use crate::registry::{JobKind, JobOutput, JobRegistry};
use crate::search::{run_search, SearchRequest};

/// Everything a job or request handler needs, built once at startup and
/// shared read-only afterwards.
pub struct SharedContext {
    pub data: DataManager,
    pub inference: InferenceManager,
    pub collections: CollectionManager,
    pub jobs: JobRegistry,
    pub registries: Registries,
    pub max_results: usize,
}

impl SharedContext {
    pub async fn from_config(config: &AppConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let registries = register_all();

        let plugins = ComputePluginManager::from_config(&config.compute_plugin, &registries.compute)?;
        let embedding_sizes = plugins.embedding_sizes();
        let inference = InferenceManager::from_config(plugins, &config.inference, &registries.inference)?;

        let default_indexer = registries.indexer.build("MemoryIndexer", &PluginConfig::new("default", Default::default()))?;
        let collections =
            CollectionManager::from_config(&config.collection, &registries.indexer, &embedding_sizes, default_indexer)
                .await?;

        let data = DataManager::new(&config.data.data_dir)?;
        info!(
            data_dir = %config.data.data_dir.display(),
            collections = config.collection.len(),
            compute_plugins = config.compute_plugin.len(),
            workers = config.jobs.workers,
            "shared context ready"
        );
        Ok(Arc::new(Self {
            data,
            inference,
            collections,
            jobs: JobRegistry::new(config.jobs.workers),
            registries,
            max_results: config.search.max_results,
        }))
    }

    /// Queue an indexing job of `ids` into `collection`.
    pub async fn submit_indexing(self: &Arc<Self>, collection: String, ids: Vec<String>) -> String {
        let ctx = self.clone();
        self.jobs
            .submit(JobKind::Index, async move {
                let report = run_indexing(&ctx.data, &ctx.inference, &ctx.collections, &collection, &ids).await?;
                Ok(JobOutput::Indexing(report))
            })
            .await
    }

    pub async fn submit_search(self: &Arc<Self>, request: SearchRequest) -> String {
        let ctx = self.clone();
        self.jobs
            .submit(JobKind::Search, async move {
                let entries = run_search(&ctx.data, &ctx.inference, &ctx.collections, &request, ctx.max_results).await?;
                Ok(JobOutput::Search(entries))
            })
            .await
    }
}
