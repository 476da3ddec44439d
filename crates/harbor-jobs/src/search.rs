//! Search job: terms -> per-collection vector searches -> mean rerank -> hydration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use harbor_core::config::DEFAULT_SEARCH_SIZE;
use harbor_core::types::{flatten_fields, split_language_suffix};
use harbor_core::{DataField, Error, FieldValue, Filter, FilterFlag, Payload, Result, ScoredPoint, VectorQuery};
use harbor_data::DataManager;
use harbor_index::CollectionManager;
use harbor_plugins::InferenceManager;

use crate::mapping::{compile_all, embed, matches_any, route, CompiledMapping};

fn default_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchTerm {
    /// Payload filter on `field`.
    Text {
        field: String,
        query: Value,
        #[serde(default)]
        flag: FilterFlag,
    },
    /// Inputs embedded through the collection's search mappings, optionally
    /// restricted to some indexes.
    Vector {
        inputs: Vec<DataField>,
        #[serde(default)]
        indexes: Vec<String>,
        #[serde(default = "default_weight")]
        weight: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub terms: Vec<SearchTerm>,
    /// Empty means every known collection.
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub size: Option<usize>,
    /// Glob patterns selecting hydrated fields; empty means all.
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultEntry {
    pub id: String,
    pub score: f32,
    pub meta: Payload,
    pub fields: Vec<HydratedField>,
}

struct VectorTerm<'a> {
    inputs: &'a [DataField],
    indexes: &'a [String],
    weight: f32,
}

fn split_terms(terms: &[SearchTerm]) -> (Vec<Filter>, Vec<VectorTerm<'_>>) {
    let mut filters = Vec::new();
    let mut vectors = Vec::new();
    for term in terms {
        match term {
            SearchTerm::Text { field, query, flag } => {
                filters.push(Filter { field: field.clone(), value: query.clone(), flag: *flag })
            }
            SearchTerm::Vector { inputs, indexes, weight } => {
                vectors.push(VectorTerm { inputs, indexes, weight: *weight })
            }
        }
    }
    (filters, vectors)
}

/// Group hits by id, score each by the arithmetic mean of its hits, sort
/// descending (ties keep first-seen order) and keep the best `size`.
pub fn rerank(hits: Vec<ScoredPoint>, size: usize) -> Vec<ScoredPoint> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Payload, f32, usize)> = HashMap::new();
    for hit in hits {
        match groups.get_mut(&hit.id) {
            Some((_, sum, count)) => {
                *sum += hit.score;
                *count += 1;
            }
            None => {
                order.push(hit.id.clone());
                groups.insert(hit.id, (hit.payload, hit.score, 1));
            }
        }
    }
    let mut ranked: Vec<ScoredPoint> = order
        .into_iter()
        .filter_map(|id| {
            let (payload, sum, count) = groups.remove(&id)?;
            Some(ScoredPoint { id, payload, score: sum / count as f32 })
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(size);
    ranked
}

async fn queries_for(
    term: &VectorTerm<'_>,
    collection: &str,
    inference: &InferenceManager,
    collections: &CollectionManager,
) -> Result<Vec<VectorQuery>> {
    let mappings: Vec<_> = collections
        .search_mappings(collection)
        .await?
        .into_iter()
        .filter(|m| term.indexes.is_empty() || term.indexes.contains(&m.index_name))
        .collect();
    let mappings = CompiledMapping::compile_list(&mappings)?;
    let vectors = embed(route(&mappings, &flatten_fields(term.inputs)), inference).await;
    Ok(vectors
        .into_iter()
        .flat_map(|(index_name, list)| {
            list.into_iter().map(move |vector| VectorQuery { index_name: index_name.clone(), vector, weight: term.weight })
        })
        .collect())
}

fn hydrate(data: &DataManager, hit: ScoredPoint, patterns: &[glob::Pattern]) -> SearchResultEntry {
    let fields = match data.load_point(&hit.id) {
        Ok(point) => point
            .flatten()
            .into_iter()
            .filter(|(name, _)| patterns.is_empty() || matches_any(patterns, name))
            .map(|(name, value)| {
                let (base, language) = split_language_suffix(&name);
                HydratedField { name: base.to_string(), language: language.map(str::to_string), value }
            })
            .collect(),
        Err(e) => {
            debug!(id = %hit.id, error = %e, "hit has no stored point");
            Vec::new()
        }
    };
    SearchResultEntry { id: hit.id, score: hit.score, meta: hit.payload, fields }
}

pub async fn run_search(
    data: &DataManager,
    inference: &InferenceManager,
    collections: &CollectionManager,
    request: &SearchRequest,
    max_results: usize,
) -> Result<Vec<SearchResultEntry>> {
    let size = request.size.unwrap_or(DEFAULT_SEARCH_SIZE).min(max_results);
    let targets = if request.collections.is_empty() {
        collections.list_collections().await
    } else {
        for name in &request.collections {
            if !collections.contains(name).await {
                return Err(Error::NotFound(format!("collection \"{name}\"")));
            }
        }
        request.collections.clone()
    };
    let field_patterns = compile_all(&request.fields)?;
    let (filters, vector_terms) = split_terms(&request.terms);
    info!(collections = targets.len(), vector_terms = vector_terms.len(), filters = filters.len(), size, "search started");

    let mut hits = Vec::new();
    for collection in &targets {
        if vector_terms.is_empty() {
            hits.extend(collections.search(collection, &[], &filters, size).await?);
            continue;
        }
        for term in &vector_terms {
            let queries = queries_for(term, collection, inference, collections).await?;
            if queries.is_empty() {
                warn!(collection = %collection, "vector term produced no queries, skipped");
                continue;
            }
            hits.extend(collections.search(collection, &queries, &filters, size).await?);
        }
    }

    let ranked = rerank(hits, size);
    info!(results = ranked.len(), "search finished");
    Ok(ranked.into_iter().map(|hit| hydrate(data, hit, &field_patterns)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, score: f32) -> ScoredPoint {
        ScoredPoint { id: id.into(), payload: Payload::new(), score }
    }

    #[test]
    fn rerank_uses_the_mean() {
        let ranked = rerank(vec![hit("a", 0.2), hit("b", 0.6), hit("a", 0.8)], 10);
        assert_eq!(ranked[0].id, "b");
        assert_eq!(ranked[1].id, "a");
        assert!((ranked[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rerank_is_stable_and_truncates() {
        let ranked = rerank(vec![hit("x", 0.5), hit("y", 0.5), hit("z", 0.9)], 2);
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["z", "x"]);
    }

    #[test]
    fn request_wire_form() {
        let request: SearchRequest = serde_json::from_value(json!({
            "terms": [
                {"type": "text", "field": "meta/medium", "query": "canvas", "flag": "NOT"},
                {"type": "vector", "inputs": [{"name": "text", "value": {"type": "text", "text": "river nymph"}}], "indexes": ["clip_text"]}
            ],
            "size": 5
        }))
        .unwrap();
        let (filters, vectors) = split_terms(&request.terms);
        assert_eq!(filters[0].flag, FilterFlag::Not);
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].weight, 1.0);
        assert_eq!(vectors[0].indexes, ["clip_text".to_string()]);
        assert!(request.collections.is_empty());
    }
}
