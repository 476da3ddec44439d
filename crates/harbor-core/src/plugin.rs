//! Request/response contract for compute plugins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{DataField, FieldValue};

/// Construction parameters handed to a registered plugin constructor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Instance name (compute plugins, inference servers) or collection name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self { name: name.into(), params }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.params.get(key).and_then(Value::as_u64).and_then(|v| usize::try_from(v).ok())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }
}

/// One invocation of a compute plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRun {
    pub plugin: String,
    #[serde(default)]
    pub inputs: Vec<DataField>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl PluginRun {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self { plugin: plugin.into(), ..Default::default() }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.inputs.push(DataField::new(name, value));
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Inputs carrying the given name, in request order.
    pub fn inputs_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.inputs.iter().filter(move |f| f.name == name).map(|f| &f.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub label: String,
    pub prob: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultData {
    Feature { shape: Vec<usize>, values: Vec<f32> },
    Classification { concepts: Vec<Concept> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedResult {
    /// Instance name of the plugin that produced the result.
    pub plugin: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub data: ResultData,
}

impl NamedResult {
    pub fn feature(plugin: impl Into<String>, name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            version: String::new(),
            data: ResultData::Feature { shape: vec![values.len()], values },
        }
    }

    pub fn classification(plugin: impl Into<String>, name: impl Into<String>, concepts: Vec<Concept>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            version: String::new(),
            data: ResultData::Classification { concepts },
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Output of a plugin run. An empty result means "no output".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    #[serde(default)]
    pub results: Vec<NamedResult>,
}

impl PluginResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Feature vectors in result order; classifications are skipped.
    pub fn features(&self) -> Vec<&[f32]> {
        self.results
            .iter()
            .filter_map(|r| match &r.data {
                ResultData::Feature { values, .. } => Some(values.as_slice()),
                ResultData::Classification { .. } => None,
            })
            .collect()
    }
}
