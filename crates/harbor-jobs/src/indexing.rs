use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use harbor_core::{Error, IndexPoint, Result};
use harbor_data::DataManager;
use harbor_index::CollectionManager;
use harbor_plugins::InferenceManager;

use crate::mapping::{compile_all, embed, extract_payload, route, CompiledMapping};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingReport {
    pub collection: String,
    pub indexed: usize,
    pub failed: Vec<String>,
}

/// Index `ids` from the data store into `collection`, one point per call.
///
/// Plugin failures only drop the affected field. A point whose store load or
/// `add_points` fails is recorded; the rest still go through and the job
/// ends in `PartialWrite` naming the failed ids.
pub async fn run_indexing(
    data: &DataManager,
    inference: &InferenceManager,
    collections: &CollectionManager,
    collection: &str,
    ids: &[String],
) -> Result<IndexingReport> {
    let config = collections.config(collection).await?;
    let mappings = CompiledMapping::compile_list(&config.indexing_plugin)?;
    let payload_patterns = compile_all(&config.payload_fields)?;
    info!(collection, points = ids.len(), mappings = mappings.len(), "indexing started");

    let mut report = IndexingReport { collection: collection.to_string(), indexed: 0, failed: Vec::new() };
    for id in ids {
        let point = match data.load_point(id) {
            Ok(point) => point,
            Err(e) => {
                error!(collection, %id, error = %e, "cannot load point");
                report.failed.push(id.clone());
                continue;
            }
        };
        let fields = point.flatten();
        let payload = extract_payload(&payload_patterns, &fields);
        let vectors = embed(route(&mappings, &fields), inference).await;
        if vectors.is_empty() && !mappings.is_empty() {
            warn!(collection, %id, "point produced no vectors");
        }
        let indexed = IndexPoint { id: id.clone(), payload, vectors };
        match collections.add_points(collection, vec![indexed]).await {
            Ok(()) => report.indexed += 1,
            Err(e) => {
                error!(collection, %id, error = %e, "add_points failed");
                report.failed.push(id.clone());
            }
        }
    }

    info!(collection, indexed = report.indexed, failed = report.failed.len(), "indexing finished");
    if report.failed.is_empty() {
        Ok(report)
    } else {
        Err(Error::PartialWrite(
            collection.to_string(),
            format!("{} of {} points failed: {}", report.failed.len(), ids.len(), report.failed.join(", ")),
        ))
    }
}
