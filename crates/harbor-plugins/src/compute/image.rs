use tracing::warn;

use harbor_core::{ComputePlugin, Error, FieldValue, NamedResult, PluginConfig, PluginResult, PluginRun, Result};
use harbor_embed::ByteHistogramEmbedder;

pub const DEFAULT_HISTOGRAM_BINS: usize = 64;

/// Histogram descriptor for every `image` input.
pub struct ImageHistogramPlugin {
    instance: String,
    plugin_type: String,
    embedder: ByteHistogramEmbedder,
}

impl ImageHistogramPlugin {
    /// Params: `embedding_size` (number of bins, must divide 256).
    pub fn from_config(plugin_type: &str, config: &PluginConfig) -> Result<Self> {
        let bins = config.param_usize("embedding_size").unwrap_or(DEFAULT_HISTOGRAM_BINS);
        let embedder = ByteHistogramEmbedder::new(bins)
            .map_err(|e| Error::Config(format!("compute plugin \"{}\": {e}", config.name)))?;
        Ok(Self { instance: config.name.clone(), plugin_type: plugin_type.to_string(), embedder })
    }
}

impl ComputePlugin for ImageHistogramPlugin {
    fn instance_name(&self) -> &str {
        &self.instance
    }

    fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    fn embedding_size(&self) -> Option<usize> {
        Some(self.embedder.dim())
    }

    fn call(&self, run: &PluginRun) -> Result<PluginResult> {
        let mut result = PluginResult::empty();
        for value in run.inputs_named("image") {
            let FieldValue::Image { content, .. } = value else {
                continue;
            };
            match self.embedder.embed_bytes(content) {
                Ok(v) => result.results.push(NamedResult::feature(&self.instance, "histogram", v).with_version(self.version())),
                Err(e) => warn!(plugin = %self.instance, error = %e, "skipping image"),
            }
        }
        Ok(result)
    }
}
