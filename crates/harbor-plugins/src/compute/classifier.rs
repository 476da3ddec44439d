use harbor_core::{
    Concept, ComputePlugin, Error, FieldValue, NamedResult, PluginConfig, PluginResult, PluginRun, Result,
};
use harbor_embed::HashTextEmbedder;

/// Zero-shot labelling of `text` inputs against a fixed label set: softmax
/// over cosine similarity between the input and each label embedding.
pub struct ConceptClassifierPlugin {
    instance: String,
    plugin_type: String,
    embedder: HashTextEmbedder,
    labels: Vec<(String, Vec<f32>)>,
    temperature: f32,
    top_k: usize,
}

impl ConceptClassifierPlugin {
    /// Params: `labels` (required), `temperature` (0.05), `top_k` (5).
    pub fn from_config(plugin_type: &str, config: &PluginConfig) -> Result<Self> {
        let labels: Vec<String> = config
            .params
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if labels.is_empty() {
            return Err(Error::Config(format!("compute plugin \"{}\" needs params.labels", config.name)));
        }
        let temperature = config.param_f64("temperature").unwrap_or(0.05) as f32;
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(Error::Config(format!(
                "compute plugin \"{}\": temperature must be positive, got {temperature}",
                config.name
            )));
        }
        let embedder = HashTextEmbedder::new(256);
        let labels = labels
            .into_iter()
            .map(|l| {
                let v = embedder.embed_text(&l);
                (l, v)
            })
            .collect();
        Ok(Self {
            instance: config.name.clone(),
            plugin_type: plugin_type.to_string(),
            embedder,
            labels,
            temperature,
            top_k: config.param_usize("top_k").unwrap_or(5),
        })
    }

    fn classify(&self, text: &str) -> Vec<Concept> {
        let v = self.embedder.embed_text(text);
        let logits: Vec<f32> = self
            .labels
            .iter()
            .map(|(_, l)| l.iter().zip(&v).map(|(a, b)| a * b).sum::<f32>() / self.temperature)
            .collect();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
        let total: f32 = exp.iter().sum();
        let mut concepts: Vec<Concept> = self
            .labels
            .iter()
            .zip(exp)
            .map(|((label, _), e)| Concept { label: label.clone(), prob: e / total })
            .collect();
        concepts.sort_by(|a, b| b.prob.total_cmp(&a.prob));
        concepts.truncate(self.top_k);
        concepts
    }
}

impl ComputePlugin for ConceptClassifierPlugin {
    fn instance_name(&self) -> &str {
        &self.instance
    }

    fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    fn call(&self, run: &PluginRun) -> Result<PluginResult> {
        let results = run
            .inputs_named("text")
            .filter_map(|v| match v {
                FieldValue::Text { text, .. } => Some(text),
                _ => None,
            })
            .map(|text| NamedResult::classification(&self.instance, "concepts", self.classify(text)))
            .collect();
        Ok(PluginResult { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probabilities_sum_to_one() {
        let cfg = PluginConfig::new("Concepts", json!({"labels": ["painting", "river nymph", "sculpture"], "top_k": 3}));
        let plugin = ConceptClassifierPlugin::from_config("ConceptClassifier", &cfg).unwrap();
        let run = PluginRun::new("Concepts").with_input("text", FieldValue::text("river nymph"));
        let result = plugin.call(&run).unwrap();
        let harbor_core::ResultData::Classification { concepts } = &result.results[0].data else {
            panic!("expected classification");
        };
        assert_eq!(concepts.len(), 3);
        assert_eq!(concepts[0].label, "river nymph");
        let total: f32 = concepts.iter().map(|c| c.prob).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn labels_are_required() {
        let cfg = PluginConfig::new("Concepts", json!({}));
        assert!(matches!(ConceptClassifierPlugin::from_config("ConceptClassifier", &cfg), Err(Error::Config(_))));
    }

    #[test]
    fn non_positive_temperature_is_rejected() {
        for t in [0.0, -0.5] {
            let cfg = PluginConfig::new("Concepts", json!({"labels": ["painting"], "temperature": t}));
            let err = ConceptClassifierPlugin::from_config("ConceptClassifier", &cfg).err();
            assert!(matches!(err, Some(Error::Config(msg)) if msg.contains("temperature")));
        }
    }
}
