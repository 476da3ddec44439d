//! Service facade over the shared context. Every outer surface (HTTP router,
//! CLI binaries, tests) goes through these operations.

use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use harbor_core::types::generate_id;
use harbor_core::{DataField, DataPoint, Error, IndexSpec, PluginResult, PluginRun, Result};
use harbor_data::DataKind;
use harbor_jobs::{JobKind, JobOutput, JobRecord, PollStatus, SearchRequest, SearchResultEntry, SharedContext};

const ACK_BUFFER: usize = 32;

/// One point of the ingestion stream, addressed to a collection. An empty
/// id is replaced by a generated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPoint {
    #[serde(alias = "collection_name")]
    pub collection: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: Vec<DataField>,
}

impl IngestPoint {
    pub fn new(collection: impl Into<String>, point: DataPoint) -> Self {
        let id = point.id.clone();
        Self { collection: collection.into(), id, fields: point.into_fields() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Per-point acknowledgement of the ingestion stream. An `Ok` ack is only
/// sent after the point is committed to the data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub id: String,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchStatus {
    Running,
    Done(Vec<SearchResultEntry>),
    Error(String),
    NotFound,
}

pub struct AnalyserService {
    ctx: Arc<SharedContext>,
}

impl AnalyserService {
    pub fn new(ctx: Arc<SharedContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    /// Configured compute plugin instances grouped by plugin type.
    pub fn list_plugins(&self) -> BTreeMap<String, Vec<String>> {
        self.ctx.inference.plugins().by_type()
    }

    /// Registered type names per registry table.
    pub fn registered_types(&self) -> BTreeMap<String, Vec<String>> {
        self.ctx
            .registries
            .names()
            .into_iter()
            .map(|(kind, names)| (kind.to_string(), names.into_iter().map(str::to_string).collect()))
            .collect()
    }

    /// Run one compute plugin directly. Unlike the jobs, failures surface.
    pub async fn analyse(
        &self,
        plugin: &str,
        inputs: Vec<DataField>,
        parameters: BTreeMap<String, Value>,
    ) -> Result<PluginResult> {
        let run = PluginRun { plugin: plugin.to_string(), inputs, parameters };
        self.ctx.inference.try_run(plugin, run).await
    }

    /// Store every point of `points`, acking each once committed. When the
    /// stream ends the batch is recorded as a list and one indexing job is
    /// queued per collection the stored points named.
    pub fn add_points<S>(self: &Arc<Self>, points: S) -> mpsc::Receiver<Ack>
    where
        S: Stream<Item = IngestPoint> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(ACK_BUFFER);
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.ingest(points, tx).await {
                error!(error = %e, "ingestion aborted");
            }
        });
        rx
    }

    /// `acks` stays open until the indexing jobs are queued, so a drained
    /// ack stream implies the jobs are visible.
    async fn ingest<S>(&self, points: S, mut acks: mpsc::Sender<Ack>) -> Result<()>
    where
        S: Stream<Item = IngestPoint> + Send + 'static,
    {
        let mut batch = self.ctx.data.create(DataKind::List)?;
        let mut stored = 0usize;
        let mut by_collection: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut points = Box::pin(points);
        while let Some(IngestPoint { collection, id, fields }) = points.next().await {
            let id = if id.is_empty() { generate_id() } else { id };
            let ack = match self.store(&collection, &id, fields).await {
                Ok(()) => {
                    batch.push_child(&stored.to_string(), &id)?;
                    stored += 1;
                    by_collection.entry(collection).or_default().push(id.clone());
                    Ack { id, status: AckStatus::Ok, error: None }
                }
                Err(e) => {
                    warn!(%id, %collection, error = %e, "point rejected");
                    Ack { id, status: AckStatus::Error, error: Some(e.to_string()) }
                }
            };
            if acks.send(ack).await.is_err() {
                warn!("ack receiver dropped, continuing ingestion");
            }
        }
        let batch_id = batch.commit()?;
        info!(%batch_id, points = stored, collections = by_collection.len(), "ingestion batch committed");

        for (collection, ids) in by_collection {
            match self.ctx.collections.indexing_mappings(&collection).await {
                Ok(mappings) if mappings.is_empty() => {
                    debug!(%collection, "no indexing mappings, points stored only");
                }
                Ok(_) => {
                    let job_id = self.ctx.submit_indexing(collection.clone(), ids).await;
                    info!(%collection, %job_id, "indexing job queued");
                }
                Err(e) => warn!(%collection, error = %e, "collection vanished before indexing"),
            }
        }
        Ok(())
    }

    async fn store(&self, collection: &str, id: &str, fields: Vec<DataField>) -> Result<()> {
        if collection.trim().is_empty() {
            return Err(Error::Config("point names no collection".into()));
        }
        if !self.ctx.collections.contains(collection).await {
            return Err(Error::NotFound(format!("collection \"{collection}\"")));
        }
        let point = DataPoint::from_fields(id, fields)?;
        self.ctx.data.save_point(&point)
    }

    pub async fn create_collection(&self, name: &str, indexes: &[IndexSpec]) -> Result<()> {
        self.ctx.collections.create_collection(name, indexes).await
    }

    pub async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.ctx.collections.delete_collection(name).await
    }

    pub async fn list_collections(&self) -> Vec<String> {
        self.ctx.collections.list_collections().await
    }

    /// Queue a search; poll the returned id with `list_search_result`.
    pub async fn search(&self, request: SearchRequest) -> String {
        self.ctx.submit_search(request).await
    }

    pub async fn list_search_result(&self, job_id: &str) -> SearchStatus {
        match self.ctx.jobs.poll(job_id).await {
            PollStatus::Running => SearchStatus::Running,
            PollStatus::Done(JobOutput::Search(entries)) => SearchStatus::Done(entries),
            // an indexing job id is not a search
            PollStatus::Done(JobOutput::Indexing(_)) | PollStatus::NotFound => SearchStatus::NotFound,
            PollStatus::Error(message) => SearchStatus::Error(message),
        }
    }

    pub async fn indexing_status(&self, job_id: &str) -> Option<JobRecord> {
        self.ctx.jobs.record(job_id).await.filter(|r| r.kind == JobKind::Index)
    }

    pub async fn indexing_jobs(&self) -> Vec<JobRecord> {
        self.ctx.jobs.list().await.into_iter().filter(|r| r.kind == JobKind::Index).collect()
    }
}
