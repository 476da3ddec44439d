//! Collection configuration model: which fields go to which plugin and index.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::plugin::PluginConfig;

/// Routes fields matching `fields` to `compute_plugin`, storing the produced
/// vectors under `index_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMapping {
    pub index_name: String,
    pub compute_plugin: String,
    /// Glob over the field name -> input name expected by the plugin.
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Indexer backend selection. `type` names an entry of the indexer registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { kind: "MemoryIndexer".to_string(), params: Value::Null }
    }
}

impl BackendConfig {
    pub fn plugin_config(&self, collection: &str) -> PluginConfig {
        PluginConfig::new(collection, self.params.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default)]
    pub indexer_plugin: BackendConfig,
    #[serde(default)]
    pub indexing_plugin: Vec<PluginMapping>,
    #[serde(default)]
    pub search_plugin: Vec<PluginMapping>,
    #[serde(default)]
    pub payload_fields: Vec<String>,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexer_plugin: BackendConfig::default(),
            indexing_plugin: Vec::new(),
            search_plugin: Vec::new(),
            payload_fields: Vec::new(),
        }
    }

    /// Every glob in the collection: mapping field patterns, input mapping
    /// keys and payload patterns.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.indexing_plugin
            .iter()
            .chain(self.search_plugin.iter())
            .flat_map(|m| m.fields.iter().chain(m.input_mapping.keys()))
            .chain(self.payload_fields.iter())
            .map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("collection name must not be empty".into()));
        }
        for pattern in self.patterns() {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::Config(format!("collection \"{}\": invalid pattern \"{pattern}\": {e}", self.name))
            })?;
        }
        for mapping in self.indexing_plugin.iter().chain(self.search_plugin.iter()) {
            if mapping.index_name.is_empty() || mapping.compute_plugin.is_empty() {
                return Err(Error::Config(format!(
                    "collection \"{}\": mapping needs both index_name and compute_plugin",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
