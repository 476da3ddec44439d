use tracing::debug;

use harbor_core::{ComputePlugin, Embedder, Error, FieldValue, NamedResult, PluginConfig, PluginResult, PluginRun, Result};
use harbor_embed::text_embedder;

pub const DEFAULT_TEXT_EMBEDDING_SIZE: usize = 512;

/// Embeds every `text` input into one feature vector.
pub struct TextEmbeddingPlugin {
    instance: String,
    plugin_type: String,
    embedder: Box<dyn Embedder>,
}

impl TextEmbeddingPlugin {
    /// Params: `embedding_size` (hashed embedder width), `model_dir`.
    pub fn from_config(plugin_type: &str, config: &PluginConfig) -> Result<Self> {
        let size = config.param_usize("embedding_size").unwrap_or(DEFAULT_TEXT_EMBEDDING_SIZE);
        let embedder = text_embedder(config.param_str("model_dir"), size)
            .map_err(|e| Error::Config(format!("compute plugin \"{}\": {e}", config.name)))?;
        Ok(Self { instance: config.name.clone(), plugin_type: plugin_type.to_string(), embedder })
    }
}

impl ComputePlugin for TextEmbeddingPlugin {
    fn instance_name(&self) -> &str {
        &self.instance
    }

    fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    fn version(&self) -> &str {
        "0.4"
    }

    fn embedding_size(&self) -> Option<usize> {
        Some(self.embedder.dim())
    }

    fn call(&self, run: &PluginRun) -> Result<PluginResult> {
        let texts: Vec<String> = run
            .inputs_named("text")
            .filter_map(|v| match v {
                FieldValue::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            return Ok(PluginResult::empty());
        }
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .map_err(|e| Error::Inference(format!("{}: {e}", self.instance)))?;
        debug!(plugin = %self.instance, count = vectors.len(), "embedded texts");
        Ok(PluginResult {
            results: vectors
                .into_iter()
                .map(|v| NamedResult::feature(&self.instance, "clip_embedding", v).with_version(self.version()))
                .collect(),
        })
    }
}
