pub mod compute;
pub mod inference;
pub mod worker;

use std::sync::Arc;

use harbor_core::{IndexerPlugin, PluginConfig};
use harbor_index::{IndexerRegistry, MemoryIndexer};

pub use compute::{ComputePluginManager, ComputeRegistry};
pub use inference::{InferenceManager, InferenceRegistry, InferenceServer, LocalInference, RemoteInference};
pub use worker::worker_router;

/// The three plugin tables.
pub struct Registries {
    pub compute: ComputeRegistry,
    pub inference: InferenceRegistry,
    pub indexer: IndexerRegistry,
}

/// Fixed registration of every built-in plugin.
pub fn register_all() -> Registries {
    let mut compute = ComputeRegistry::new("compute_plugin");
    compute::register_compute(&mut compute);

    let mut inference = InferenceRegistry::new("inference");
    inference::register_inference(&mut inference);

    let mut indexer = IndexerRegistry::new("indexer");
    indexer.register("MemoryIndexer", |_cfg: &PluginConfig| {
        Ok(Arc::new(MemoryIndexer::new()) as Arc<dyn IndexerPlugin>)
    });
    #[cfg(feature = "lance")]
    indexer.register("LanceIndexer", |cfg: &PluginConfig| {
        Ok(Arc::new(harbor_index::LanceIndexer::from_config(cfg)?) as Arc<dyn IndexerPlugin>)
    });

    Registries { compute, inference, indexer }
}

impl Registries {
    /// Registered type names per table, used by `list_plugins`.
    pub fn names(&self) -> Vec<(&'static str, Vec<&str>)> {
        vec![
            (self.compute.kind(), self.compute.names()),
            (self.inference.kind(), self.inference.names()),
            (self.indexer.kind(), self.indexer.names()),
        ]
    }
}
