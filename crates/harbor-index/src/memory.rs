//! Brute-force in-process indexer.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use harbor_core::index::payload_matches;
use harbor_core::{Error, Filter, IndexPoint, IndexSpec, IndexerPlugin, Result, ScoredPoint, VectorQuery};

use crate::score::max_sim;

#[derive(Debug, Default)]
struct Collection {
    indexes: Vec<IndexSpec>,
    points: BTreeMap<String, IndexPoint>,
}

impl Collection {
    fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Default)]
pub struct MemoryIndexer {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn sort_by_score(points: &mut [ScoredPoint]) {
    points.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

#[async_trait]
impl IndexerPlugin for MemoryIndexer {
    async fn get_indexes(&self, collection: &str) -> Result<Option<Vec<IndexSpec>>> {
        Ok(self.collections.read().await.get(collection).map(|c| c.indexes.clone()))
    }

    async fn create_collection(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection) {
            return Err(Error::VectorStore(format!("collection \"{collection}\" already exists")));
        }
        collections.insert(collection.to_string(), Collection { indexes: indexes.to_vec(), points: BTreeMap::new() });
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.write().await.remove(collection).is_some())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn add_points(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection \"{collection}\"")))?;

        for point in &points {
            for (name, vectors) in &point.vectors {
                let spec = target.index(name).ok_or_else(|| {
                    Error::VectorStore(format!("point {}: unknown index \"{name}\"", point.id))
                })?;
                if let Some(bad) = vectors.iter().find(|v| v.len() != spec.size) {
                    return Err(Error::VectorStore(format!(
                        "point {}: index \"{name}\" expects {} dimensions, got {}",
                        point.id,
                        spec.size,
                        bad.len()
                    )));
                }
            }
        }
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        debug!(collection, total = target.points.len(), "points upserted");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        queries: &[VectorQuery],
        filters: &[Filter],
        size: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection \"{collection}\"")))?;

        let candidates = target.points.values().filter(|p| payload_matches(filters, &p.payload));

        if queries.is_empty() {
            return Ok(candidates
                .take(size)
                .map(|p| ScoredPoint { id: p.id.clone(), payload: p.payload.clone(), score: 1.0 })
                .collect());
        }

        let candidates: Vec<&IndexPoint> = candidates.collect();
        let mut results = Vec::new();
        for query in queries {
            let spec = target.index(&query.index_name).ok_or_else(|| {
                Error::VectorStore(format!("collection \"{collection}\" has no index \"{}\"", query.index_name))
            })?;
            let mut hits: Vec<ScoredPoint> = candidates
                .iter()
                .filter_map(|p| {
                    let vectors = p.vectors.get(&query.index_name)?;
                    let score = max_sim(spec.distance, &query.vector, vectors)?;
                    Some(ScoredPoint { id: p.id.clone(), payload: p.payload.clone(), score: score * query.weight })
                })
                .collect();
            sort_by_score(&mut hits);
            hits.truncate(size);
            results.extend(hits);
        }
        sort_by_score(&mut results);
        Ok(results)
    }
}
