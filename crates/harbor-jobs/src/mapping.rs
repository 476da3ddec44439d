//! Field -> plugin routing.
//!
//! Every mapping, every pattern of the mapping and every field are tried in
//! order and each match yields its own route, so a field matched twice is
//! embedded twice.

use glob::{MatchOptions, Pattern};
use serde_json::Value;
use tracing::{debug, warn};

use harbor_core::{DataField, Error, FieldValue, NamedVectors, Payload, PluginMapping, PluginRun, Result};
use harbor_plugins::InferenceManager;

/// `*` also crosses `/`, so `meta/*` matches `meta/origin/name`.
const MATCH: MatchOptions = MatchOptions { case_sensitive: true, require_literal_separator: false, require_literal_leading_dot: false };

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::Config(format!("invalid pattern \"{pattern}\": {e}")))
}

pub fn compile_all(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| compile(p)).collect()
}

pub fn matches_any(patterns: &[Pattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches_with(name, MATCH))
}

#[derive(Debug, Clone)]
pub struct CompiledMapping {
    pub index_name: String,
    pub compute_plugin: String,
    fields: Vec<Pattern>,
    // sorted by key
    inputs: Vec<(String, Pattern, String)>,
}

impl CompiledMapping {
    pub fn compile(mapping: &PluginMapping) -> Result<Self> {
        let inputs = mapping
            .input_mapping
            .iter()
            .map(|(key, target)| Ok((key.clone(), compile(key)?, target.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            index_name: mapping.index_name.clone(),
            compute_plugin: mapping.compute_plugin.clone(),
            fields: compile_all(&mapping.fields)?,
            inputs,
        })
    }

    pub fn compile_list(mappings: &[PluginMapping]) -> Result<Vec<Self>> {
        mappings.iter().map(Self::compile).collect()
    }

    /// Input name the plugin expects for `field`: an exact key first, then
    /// the first matching glob key; unmatched names pass through.
    pub fn input_name(&self, field: &str) -> String {
        if let Some((_, _, target)) = self.inputs.iter().find(|(key, _, _)| key == field) {
            return target.clone();
        }
        self.inputs
            .iter()
            .find(|(_, pattern, _)| pattern.matches_with(field, MATCH))
            .map(|(_, _, target)| target.clone())
            .unwrap_or_else(|| field.to_string())
    }
}

/// One plugin invocation on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub index_name: String,
    pub compute_plugin: String,
    pub field_name: String,
    pub input_name: String,
    pub value: FieldValue,
}

pub fn route(mappings: &[CompiledMapping], fields: &[(String, FieldValue)]) -> Vec<Route> {
    let mut routes = Vec::new();
    for mapping in mappings {
        for pattern in &mapping.fields {
            for (name, value) in fields {
                if pattern.matches_with(name, MATCH) {
                    routes.push(Route {
                        index_name: mapping.index_name.clone(),
                        compute_plugin: mapping.compute_plugin.clone(),
                        field_name: name.clone(),
                        input_name: mapping.input_name(name),
                        value: value.clone(),
                    });
                }
            }
        }
    }
    routes
}

/// Run every route and collect the produced feature vectors per index.
/// A route whose plugin yields nothing is skipped.
pub async fn embed(routes: Vec<Route>, inference: &InferenceManager) -> NamedVectors {
    let mut vectors = NamedVectors::new();
    for r in routes {
        debug!(field = %r.field_name, input = %r.input_name, plugin = %r.compute_plugin, index = %r.index_name, "routing field");
        let run = PluginRun {
            plugin: r.compute_plugin.clone(),
            inputs: vec![DataField::new(r.input_name, r.value)],
            parameters: Default::default(),
        };
        let result = inference.run(&r.compute_plugin, run).await;
        let features = result.features();
        if features.is_empty() {
            warn!(field = %r.field_name, plugin = %r.compute_plugin, "no plugin output, field omitted");
            continue;
        }
        let entry = vectors.entry(r.index_name).or_default();
        entry.extend(features.into_iter().map(<[f32]>::to_vec));
    }
    vectors
}

/// Scalar fields matching a payload pattern. Repeated names collect into an array.
pub fn extract_payload(patterns: &[Pattern], fields: &[(String, FieldValue)]) -> Payload {
    let mut payload = Payload::new();
    for (name, value) in fields {
        if !matches_any(patterns, name) {
            continue;
        }
        let Some(scalar) = value.to_scalar() else {
            continue;
        };
        let scalar = Value::from(scalar);
        match payload.get_mut(name) {
            Some(Value::Array(items)) => items.push(scalar),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, scalar]);
            }
            None => {
                payload.insert(name.clone(), scalar);
            }
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mapping(fields: &[&str], inputs: &[(&str, &str)]) -> PluginMapping {
        PluginMapping {
            index_name: "clip_text".into(),
            compute_plugin: "ClipText".into(),
            input_mapping: inputs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn text(name: &str, t: &str) -> (String, FieldValue) {
        (name.to_string(), FieldValue::text(t))
    }

    #[test]
    fn overlapping_patterns_fan_out() {
        let m = CompiledMapping::compile(&mapping(&["meta/*", "meta/title"], &[("meta/*", "text")])).unwrap();
        let fields = vec![text("meta/title", "Arethusa"), text("meta/artist", "George Fuller"), text("image", "x")];
        let routes = route(&[m], &fields);
        let names: Vec<&str> = routes.iter().map(|r| r.field_name.as_str()).collect();
        assert_eq!(names, ["meta/title", "meta/artist", "meta/title"]);
        assert!(routes.iter().all(|r| r.input_name == "text"));
    }

    #[test]
    fn input_mapping_prefers_exact_key() {
        let m = CompiledMapping::compile(&mapping(&["*"], &[("meta/*", "text"), ("meta/title", "title"), ("a*", "x")]))
            .unwrap();
        assert_eq!(m.input_name("meta/title"), "title");
        assert_eq!(m.input_name("meta/artist"), "text");
        assert_eq!(m.input_name("image"), "image");
    }

    #[test]
    fn star_crosses_separator_and_question_mark_is_one_char() {
        let m = CompiledMapping::compile(&mapping(&["meta/*", "im?ge"], &[])).unwrap();
        let fields = vec![text("meta/origin/name", "wikidata"), text("image", "a"), text("imaage", "b")];
        let routed: Vec<String> = route(&[m], &fields).into_iter().map(|r| r.field_name).collect();
        assert_eq!(routed, ["meta/origin/name", "image"]);
    }

    #[test]
    fn payload_keeps_matching_scalars_only() {
        let patterns = compile_all(&["meta/*".to_string(), "origin_name".to_string()]).unwrap();
        let fields = vec![
            text("meta/medium", "oil paint"),
            text("meta/medium", "canvas"),
            (String::from("meta/year"), FieldValue::Int { value: 1887 }),
            (String::from("meta/where"), FieldValue::Geo { lat: 1.0, lon: 2.0 }),
            text("origin_name", "wikidata"),
            text("title", "ignored"),
        ];
        let payload = extract_payload(&patterns, &fields);
        assert_eq!(payload["meta/medium"], serde_json::json!(["oil paint", "canvas"]));
        assert_eq!(payload["meta/year"], 1887);
        assert_eq!(payload["origin_name"], "wikidata");
        assert!(!payload.contains_key("meta/where"));
        assert!(!payload.contains_key("title"));
    }
}
