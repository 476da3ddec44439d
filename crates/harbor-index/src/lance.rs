//! LanceDB backend.
//!
//! A collection owns one points table (id + JSON payload) and one table per
//! named index holding `(id, vector)` rows; multi-vector points store one row
//! per vector. Collection definitions live in a key/value meta table.

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use harbor_core::index::payload_matches;
use harbor_core::types::generate_id;
use harbor_core::{
    Distance, Error, Filter, IndexPoint, IndexSpec, IndexerPlugin, Payload, PluginConfig, Result, ScoredPoint,
    VectorQuery,
};

use crate::memory::sort_by_score;

const META_TABLE: &str = "harbor_collections";

#[derive(Serialize, Deserialize)]
struct StoredCollection {
    generation: String,
    indexes: Vec<IndexSpec>,
}

impl StoredCollection {
    fn points_table(&self, collection: &str) -> String {
        format!("{collection}__points__{}", self.generation)
    }

    fn index_table(&self, collection: &str, index: &str) -> String {
        format!("{collection}__{index}__{}", self.generation)
    }
}

/// The connection is opened on first use, so construction stays synchronous
/// and works from any runtime flavour.
pub struct LanceIndexer {
    uri: String,
    db: OnceCell<Connection>,
}

impl LanceIndexer {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), db: OnceCell::new() }
    }

    /// Connect eagerly; fails fast on a bad uri.
    pub async fn open(uri: &str) -> Result<Self> {
        let indexer = Self::new(uri);
        indexer.db().await?;
        Ok(indexer)
    }

    /// Registry constructor: `params.uri` names the database directory.
    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        let uri = config
            .param_str("uri")
            .ok_or_else(|| Error::Config(format!("LanceIndexer for \"{}\" needs params.uri", config.name)))?;
        Ok(Self::new(harbor_core::config::expand_path(uri).to_string_lossy().into_owned()))
    }

    async fn db(&self) -> Result<&Connection> {
        self.db
            .get_or_try_init(|| async {
                let db = connect(&self.uri).execute().await.map_err(Error::vector_store)?;
                info!(uri = %self.uri, "opened lancedb");
                Ok::<_, Error>(db)
            })
            .await
    }

    async fn stored(&self, collection: &str) -> Result<Option<StoredCollection>> {
        match get_meta(self.db().await?, META_TABLE, collection).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn require(&self, collection: &str) -> Result<StoredCollection> {
        self.stored(collection)
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection \"{collection}\"")))
    }

    async fn payloads(&self, table: &str, filters: &[Filter]) -> Result<Vec<(String, Payload)>> {
        let t = self.db().await?.open_table(table).execute().await.map_err(Error::vector_store)?;
        let mut stream = t.query().execute().await.map_err(Error::vector_store)?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::vector_store)? {
            let ids = string_column(&batch, "id")?;
            let payloads = string_column(&batch, "payload")?;
            for i in 0..batch.num_rows() {
                let payload = match serde_json::from_str::<Value>(payloads.value(i))? {
                    Value::Object(map) => map,
                    _ => Payload::new(),
                };
                if payload_matches(filters, &payload) {
                    out.push((ids.value(i).to_string(), payload));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

fn lance_distance(d: Distance) -> DistanceType {
    match d {
        Distance::Cosine => DistanceType::Cosine,
        Distance::Dot => DistanceType::Dot,
        Distance::Euclid => DistanceType::L2,
    }
}

fn score_from_distance(d: Distance, distance: f32) -> f32 {
    match d {
        Distance::Cosine => 1.0 - distance,
        Distance::Dot => -distance,
        Distance::Euclid => 1.0 / (1.0 + distance.sqrt()),
    }
}

fn points_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("payload", DataType::Utf8, false),
    ]))
}

fn vectors_schema(size: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), size as i32),
            true,
        ),
    ]))
}

fn meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::VectorStore(format!("column {name} missing")))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<()> {
    let names = conn.table_names().execute().await.map_err(Error::vector_store)?;
    if names.iter().any(|n| n == name) {
        return Ok(());
    }
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::vector_store)?;
    Ok(())
}

async fn append(conn: &Connection, table: &str, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    let t = conn.open_table(table).execute().await.map_err(Error::vector_store)?;
    t.add(reader).execute().await.map_err(Error::vector_store)?;
    Ok(())
}

async fn delete_ids(conn: &Connection, table: &str, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let predicate = format!("id IN ({})", ids.iter().map(|i| quote(i)).collect::<Vec<_>>().join(", "));
    let t = conn.open_table(table).execute().await.map_err(Error::vector_store)?;
    t.delete(&predicate).await.map_err(Error::vector_store)?;
    Ok(())
}

async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    ensure_table(conn, table, meta_schema()).await?;
    let t = conn.open_table(table).execute().await.map_err(Error::vector_store)?;
    let rb = RecordBatch::try_new(
        meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(Error::vector_store)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), meta_schema()));
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(Error::vector_store)?;
    Ok(())
}

async fn delete_meta(conn: &Connection, table: &str, key: &str) -> Result<()> {
    ensure_table(conn, table, meta_schema()).await?;
    let t = conn.open_table(table).execute().await.map_err(Error::vector_store)?;
    t.delete(&format!("key = {}", quote(key))).await.map_err(Error::vector_store)?;
    Ok(())
}

async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    let names = conn.table_names().execute().await.map_err(Error::vector_store)?;
    if !names.iter().any(|n| n == table) {
        return Ok(None);
    }
    let t = conn.open_table(table).execute().await.map_err(Error::vector_store)?;
    let mut stream = t
        .query()
        .only_if(format!("key = {}", quote(key)))
        .execute()
        .await
        .map_err(Error::vector_store)?;
    while let Some(batch) = stream.try_next().await.map_err(Error::vector_store)? {
        if batch.num_rows() == 0 {
            continue;
        }
        return Ok(Some(string_column(&batch, "value")?.value(0).to_string()));
    }
    Ok(None)
}

async fn all_meta_keys(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let names = conn.table_names().execute().await.map_err(Error::vector_store)?;
    if !names.iter().any(|n| n == table) {
        return Ok(Vec::new());
    }
    let t = conn.open_table(table).execute().await.map_err(Error::vector_store)?;
    let mut stream = t.query().execute().await.map_err(Error::vector_store)?;
    let mut keys = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(Error::vector_store)? {
        let col = string_column(&batch, "key")?;
        keys.extend((0..batch.num_rows()).map(|i| col.value(i).to_string()));
    }
    keys.sort();
    Ok(keys)
}

#[async_trait]
impl IndexerPlugin for LanceIndexer {
    async fn get_indexes(&self, collection: &str) -> Result<Option<Vec<IndexSpec>>> {
        Ok(self.stored(collection).await?.map(|s| s.indexes))
    }

    async fn create_collection(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        if self.stored(collection).await?.is_some() {
            return Err(Error::VectorStore(format!("collection \"{collection}\" already exists")));
        }
        let db = self.db().await?;
        let stored = StoredCollection { generation: generate_id()[..8].to_string(), indexes: indexes.to_vec() };
        ensure_table(db, &stored.points_table(collection), points_schema()).await?;
        for index in indexes {
            ensure_table(db, &stored.index_table(collection, &index.name), vectors_schema(index.size)).await?;
        }
        set_meta(db, META_TABLE, collection, &serde_json::to_string(&stored)?).await?;
        info!(collection, indexes = indexes.len(), "created lance collection");
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        let Some(stored) = self.stored(collection).await? else {
            return Ok(false);
        };
        let db = self.db().await?;
        delete_meta(db, META_TABLE, collection).await?;
        // tables of a deleted generation are emptied, never reused
        let t = db.open_table(stored.points_table(collection)).execute().await.map_err(Error::vector_store)?;
        t.delete("true").await.map_err(Error::vector_store)?;
        for index in &stored.indexes {
            let t = db
                .open_table(stored.index_table(collection, &index.name))
                .execute()
                .await
                .map_err(Error::vector_store)?;
            t.delete("true").await.map_err(Error::vector_store)?;
        }
        Ok(true)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        all_meta_keys(self.db().await?, META_TABLE).await
    }

    async fn add_points(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()> {
        let stored = self.require(collection).await?;
        let specs: HashMap<&str, &IndexSpec> = stored.indexes.iter().map(|i| (i.name.as_str(), i)).collect();
        for point in &points {
            for (name, vectors) in &point.vectors {
                let spec = specs
                    .get(name.as_str())
                    .ok_or_else(|| Error::VectorStore(format!("point {}: unknown index \"{name}\"", point.id)))?;
                if vectors.iter().any(|v| v.len() != spec.size) {
                    return Err(Error::VectorStore(format!(
                        "point {}: index \"{name}\" expects {} dimensions",
                        point.id, spec.size
                    )));
                }
            }
        }

        let db = self.db().await?;
        let ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();
        let points_table = stored.points_table(collection);
        delete_ids(db, &points_table, &ids).await?;
        let payloads = points
            .iter()
            .map(|p| serde_json::to_string(&p.payload))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = RecordBatch::try_new(
            points_schema(),
            vec![Arc::new(StringArray::from(ids.clone())), Arc::new(StringArray::from(payloads))],
        )
        .map_err(Error::vector_store)?;
        append(db, &points_table, batch).await?;

        for spec in &stored.indexes {
            let table = stored.index_table(collection, &spec.name);
            delete_ids(db, &table, &ids).await?;
            let mut row_ids = Vec::new();
            let mut rows: Vec<Option<Vec<Option<f32>>>> = Vec::new();
            for point in &points {
                for v in point.vectors.get(&spec.name).into_iter().flatten() {
                    row_ids.push(point.id.clone());
                    rows.push(Some(v.iter().map(|&x| Some(x)).collect()));
                }
            }
            if rows.is_empty() {
                continue;
            }
            let batch = RecordBatch::try_new(
                vectors_schema(spec.size),
                vec![
                    Arc::new(StringArray::from(row_ids)),
                    Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                        rows.into_iter(),
                        spec.size as i32,
                    )),
                ],
            )
            .map_err(Error::vector_store)?;
            append(db, &table, batch).await?;
        }
        debug!(collection, points = ids.len(), "points upserted");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        queries: &[VectorQuery],
        filters: &[Filter],
        size: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let stored = self.require(collection).await?;
        let allowed: HashMap<String, Payload> =
            self.payloads(&stored.points_table(collection), filters).await?.into_iter().collect();

        if queries.is_empty() {
            let mut hits: Vec<ScoredPoint> =
                allowed.into_iter().map(|(id, payload)| ScoredPoint { id, payload, score: 1.0 }).collect();
            hits.sort_by(|a, b| a.id.cmp(&b.id));
            hits.truncate(size);
            return Ok(hits);
        }

        let db = self.db().await?;
        let mut results = Vec::new();
        for query in queries {
            let spec = stored
                .indexes
                .iter()
                .find(|i| i.name == query.index_name)
                .ok_or_else(|| Error::VectorStore(format!("collection \"{collection}\" has no index \"{}\"", query.index_name)))?;
            let t = db
                .open_table(stored.index_table(collection, &spec.name))
                .execute()
                .await
                .map_err(Error::vector_store)?;
            // over-fetch: rows are per vector and filters apply afterwards
            let limit = (size * 10).max(100);
            let mut stream = t
                .vector_search(query.vector.clone())
                .map_err(Error::vector_store)?
                .distance_type(lance_distance(spec.distance))
                .limit(limit)
                .execute()
                .await
                .map_err(Error::vector_store)?;

            let mut best: HashMap<String, f32> = HashMap::new();
            while let Some(batch) = stream.try_next().await.map_err(Error::vector_store)? {
                let ids = string_column(&batch, "id")?;
                let distances = batch
                    .column_by_name("_distance")
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .ok_or_else(|| Error::VectorStore("column _distance missing".into()))?;
                for i in 0..batch.num_rows() {
                    if distances.is_null(i) {
                        continue;
                    }
                    let score = score_from_distance(spec.distance, distances.value(i));
                    let entry = best.entry(ids.value(i).to_string()).or_insert(f32::MIN);
                    *entry = entry.max(score);
                }
            }

            let mut hits: Vec<ScoredPoint> = best
                .into_iter()
                .filter_map(|(id, score)| {
                    let payload = allowed.get(&id)?.clone();
                    Some(ScoredPoint { id, payload, score: score * query.weight })
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
