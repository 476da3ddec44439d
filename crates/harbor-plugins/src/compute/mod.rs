//! Built-in compute plugins and the per-instance plugin table.

mod classifier;
mod image;
mod text;

pub use classifier::ConceptClassifierPlugin;
pub use image::{ImageHistogramPlugin, DEFAULT_HISTOGRAM_BINS};
pub use text::{TextEmbeddingPlugin, DEFAULT_TEXT_EMBEDDING_SIZE};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use harbor_core::config::ComputePluginConfig;
use harbor_core::{ComputePlugin, PluginConfig, Registry, Result};

pub type ComputeRegistry = Registry<Arc<dyn ComputePlugin>>;

pub fn register_compute(registry: &mut ComputeRegistry) {
    for kind in ["TextEmbedding", "ClipTextEmbeddingFeature"] {
        registry.register(kind, move |cfg: &PluginConfig| {
            Ok(Arc::new(TextEmbeddingPlugin::from_config(kind, cfg)?) as Arc<dyn ComputePlugin>)
        });
    }
    for kind in ["ImageHistogram", "ClipImageEmbeddingFeature"] {
        registry.register(kind, move |cfg: &PluginConfig| {
            Ok(Arc::new(ImageHistogramPlugin::from_config(kind, cfg)?) as Arc<dyn ComputePlugin>)
        });
    }
    registry.register("ConceptClassifier", |cfg: &PluginConfig| {
        Ok(Arc::new(ConceptClassifierPlugin::from_config("ConceptClassifier", cfg)?) as Arc<dyn ComputePlugin>)
    });
}

/// Configured compute plugin instances with their inference binding.
#[derive(Clone, Default)]
pub struct ComputePluginManager {
    plugins: BTreeMap<String, (Arc<dyn ComputePlugin>, Option<String>)>,
}

impl ComputePluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[ComputePluginConfig], registry: &ComputeRegistry) -> Result<Self> {
        let mut manager = Self::new();
        for cfg in configs {
            let plugin = registry.build(&cfg.kind, &PluginConfig::new(cfg.name.clone(), cfg.params.clone()))?;
            info!(instance = %cfg.name, kind = %cfg.kind, inference = ?cfg.inference, "compute plugin ready");
            manager.insert(plugin, cfg.inference.clone());
        }
        Ok(manager)
    }

    pub fn insert(&mut self, plugin: Arc<dyn ComputePlugin>, inference: Option<String>) {
        self.plugins.insert(plugin.instance_name().to_string(), (plugin, inference));
    }

    pub fn get(&self, instance: &str) -> Option<&Arc<dyn ComputePlugin>> {
        self.plugins.get(instance).map(|(p, _)| p)
    }

    pub fn binding(&self, instance: &str) -> Option<&str> {
        self.plugins.get(instance).and_then(|(_, b)| b.as_deref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Instances bound to the given inference server.
    pub fn bound_to(&self, server: &str) -> Vec<Arc<dyn ComputePlugin>> {
        self.plugins
            .values()
            .filter(|(_, b)| b.as_deref() == Some(server))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Output width per embedding instance.
    pub fn embedding_sizes(&self) -> HashMap<String, usize> {
        self.plugins
            .iter()
            .filter_map(|(name, (p, _))| p.embedding_size().map(|s| (name.clone(), s)))
            .collect()
    }

    /// Instance names grouped by plugin type.
    pub fn by_type(&self) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, (p, _)) in &self.plugins {
            out.entry(p.plugin_type().to_string()).or_default().push(name.clone());
        }
        out
    }
}
