//! Backend-agnostic vector index types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::types::Payload;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

/// A named vector index inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub size: usize,
    #[serde(default)]
    pub distance: Distance,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self { name: name.into(), size, distance: Distance::Cosine }
    }
}

/// Vectors per index name. Each index may hold several vectors for one point.
pub type NamedVectors = BTreeMap<String, Vec<Vec<f32>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub id: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub vectors: NamedVectors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub index_name: String,
    pub vector: Vec<f32>,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterFlag {
    #[default]
    Must,
    Should,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: Value,
    #[serde(default)]
    pub flag: FilterFlag,
}

impl Filter {
    pub fn must(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), value: value.into(), flag: FilterFlag::Must }
    }

    pub fn should(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), value: value.into(), flag: FilterFlag::Should }
    }

    pub fn not(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), value: value.into(), flag: FilterFlag::Not }
    }

    /// Equality against a payload value; arrays match when any element does.
    pub fn matches_payload(&self, payload: &Payload) -> bool {
        match payload.get(&self.field) {
            Some(Value::Array(items)) => items.iter().any(|v| scalar_eq(v, &self.value)),
            Some(v) => scalar_eq(v, &self.value),
            None => false,
        }
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        _ => a == b,
    }
}

/// MUST filters are AND-ed, at least one SHOULD must hold when any is
/// given, and any matching NOT excludes the point.
pub fn payload_matches(filters: &[Filter], payload: &Payload) -> bool {
    let mut should_seen = false;
    let mut should_hit = false;
    for f in filters {
        let hit = f.matches_payload(payload);
        match f.flag {
            FilterFlag::Must if !hit => return false,
            FilterFlag::Not if hit => return false,
            FilterFlag::Should => {
                should_seen = true;
                should_hit |= hit;
            }
            _ => {}
        }
    }
    !should_seen || should_hit
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    #[serde(default)]
    pub payload: Payload,
    pub score: f32,
}

/// Every target index must exist in `current` with exactly the same size.
pub fn check_compatibility(collection: &str, target: &[IndexSpec], current: &[IndexSpec]) -> Result<()> {
    let current: HashMap<&str, usize> = current.iter().map(|i| (i.name.as_str(), i.size)).collect();
    let mut problems = Vec::new();
    for t in target {
        match current.get(t.name.as_str()) {
            Some(size) if *size == t.size => {}
            Some(size) => problems.push(format!(
                "index \"{}\" has size {} but the configuration requires {}",
                t.name, size, t.size
            )),
            None => problems.push(format!("index \"{}\" does not exist", t.name)),
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "collection \"{collection}\" is incompatible with its configuration: {}",
            problems.join("; ")
        )))
    }
}
