//! Collection lifecycle: backend construction, create-or-check at startup
//! and per-collection locking.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use harbor_core::index::check_compatibility;
use harbor_core::{
    CollectionConfig, Error, Filter, IndexPoint, IndexSpec, IndexerPlugin, PluginMapping, Registry, Result,
    ScoredPoint, VectorQuery,
};

pub type IndexerRegistry = Registry<Arc<dyn IndexerPlugin>>;

#[derive(Clone)]
struct Entry {
    config: Arc<CollectionConfig>,
    indexer: Arc<dyn IndexerPlugin>,
    // create/delete hold it exclusively, add/search shared
    lock: Arc<RwLock<()>>,
}

pub struct CollectionManager {
    entries: RwLock<HashMap<String, Entry>>,
    default_indexer: Arc<dyn IndexerPlugin>,
}

/// Index specs a collection needs: one per distinct `index_name` across its
/// indexing and search mappings, sized by the compute plugin's output.
pub fn target_indexes(config: &CollectionConfig, embedding_sizes: &HashMap<String, usize>) -> Result<Vec<IndexSpec>> {
    let mut specs: Vec<IndexSpec> = Vec::new();
    for mapping in config.indexing_plugin.iter().chain(config.search_plugin.iter()) {
        let size = *embedding_sizes.get(&mapping.compute_plugin).ok_or_else(|| {
            Error::Config(format!(
                "collection \"{}\": compute plugin \"{}\" does not produce embeddings",
                config.name, mapping.compute_plugin
            ))
        })?;
        match specs.iter().find(|s| s.name == mapping.index_name) {
            Some(existing) if existing.size != size => {
                return Err(Error::Config(format!(
                    "collection \"{}\": index \"{}\" fed with sizes {} and {}",
                    config.name, mapping.index_name, existing.size, size
                )));
            }
            Some(_) => {}
            None => specs.push(IndexSpec::new(mapping.index_name.clone(), size)),
        }
    }
    Ok(specs)
}

/// Create the collection when missing, otherwise require the stored indexes
/// to match `target`.
pub async fn init_collection(indexer: &dyn IndexerPlugin, name: &str, target: &[IndexSpec]) -> Result<()> {
    match indexer.get_indexes(name).await? {
        None => {
            indexer.create_collection(name, target).await?;
            info!(collection = name, indexes = target.len(), "created collection");
        }
        Some(current) => {
            check_compatibility(name, target, &current)?;
            info!(collection = name, "collection compatible with configuration");
        }
    }
    Ok(())
}

impl CollectionManager {
    pub fn new(default_indexer: Arc<dyn IndexerPlugin>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), default_indexer }
    }

    /// Build every configured collection through the indexer registry and run
    /// create-or-check on it. Any incompatibility is fatal.
    pub async fn from_config(
        configs: &[CollectionConfig],
        indexers: &IndexerRegistry,
        embedding_sizes: &HashMap<String, usize>,
        default_indexer: Arc<dyn IndexerPlugin>,
    ) -> Result<Self> {
        let manager = Self::new(default_indexer);
        for config in configs {
            config.validate()?;
            let indexer = indexers.build(&config.indexer_plugin.kind, &config.indexer_plugin.plugin_config(&config.name))?;
            let target = target_indexes(config, embedding_sizes)?;
            init_collection(indexer.as_ref(), &config.name, &target).await?;
            manager.entries.write().await.insert(
                config.name.clone(),
                Entry { config: Arc::new(config.clone()), indexer, lock: Arc::new(RwLock::new(())) },
            );
        }
        Ok(manager)
    }

    async fn entry(&self, name: &str) -> Result<Entry> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("collection \"{name}\"")))
    }

    /// Create a collection at runtime on the default backend. It has no
    /// mappings, so points reach it only through explicit index vectors.
    ///
    /// The name is reserved under the map lock; the backend call runs with
    /// only the new collection's lock held.
    pub async fn create_collection(&self, name: &str, indexes: &[IndexSpec]) -> Result<()> {
        CollectionConfig::new(name).validate()?;
        let lock = Arc::new(RwLock::new(()));
        let _guard = lock.clone().write_owned().await;
        {
            let mut entries = self.entries.write().await;
            if entries.contains_key(name) {
                return Err(Error::VectorStore(format!("collection \"{name}\" already exists")));
            }
            entries.insert(
                name.to_string(),
                Entry {
                    config: Arc::new(CollectionConfig::new(name)),
                    indexer: self.default_indexer.clone(),
                    lock: lock.clone(),
                },
            );
        }
        if let Err(e) = self.default_indexer.create_collection(name, indexes).await {
            let mut entries = self.entries.write().await;
            if entries.get(name).is_some_and(|entry| Arc::ptr_eq(&entry.lock, &lock)) {
                entries.remove(name);
            }
            return Err(e);
        }
        info!(collection = name, "collection created");
        Ok(())
    }

    /// The entry stays registered until the backend delete succeeds.
    pub async fn delete_collection(&self, name: &str) -> Result<bool> {
        let entry = match self.entries.read().await.get(name).cloned() {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let _guard = entry.lock.write().await;
        // a concurrent delete may have won while we waited
        if !self.entries.read().await.get(name).is_some_and(|e| Arc::ptr_eq(&e.lock, &entry.lock)) {
            return Ok(false);
        }
        let deleted = entry.indexer.delete_collection(name).await?;
        self.entries.write().await.remove(name);
        info!(collection = name, deleted, "collection deleted");
        Ok(true)
    }

    pub async fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn config(&self, name: &str) -> Result<Arc<CollectionConfig>> {
        Ok(self.entry(name).await?.config)
    }

    pub async fn indexing_mappings(&self, name: &str) -> Result<Vec<PluginMapping>> {
        Ok(self.config(name).await?.indexing_plugin.clone())
    }

    pub async fn search_mappings(&self, name: &str) -> Result<Vec<PluginMapping>> {
        Ok(self.config(name).await?.search_plugin.clone())
    }

    pub async fn payload_fields(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.config(name).await?.payload_fields.clone())
    }

    pub async fn get_indexes(&self, name: &str) -> Result<Option<Vec<IndexSpec>>> {
        let entry = self.entry(name).await?;
        let _guard = entry.lock.read().await;
        entry.indexer.get_indexes(name).await
    }

    pub async fn add_points(&self, name: &str, points: Vec<IndexPoint>) -> Result<()> {
        let entry = self.entry(name).await?;
        let _guard = entry.lock.read().await;
        entry.indexer.add_points(name, points).await
    }

    pub async fn search(
        &self,
        name: &str,
        queries: &[VectorQuery],
        filters: &[Filter],
        size: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let entry = self.entry(name).await?;
        let _guard = entry.lock.read().await;
        entry.indexer.search(name, queries, filters, size).await
    }
}
