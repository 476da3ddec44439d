use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use harbor_core::{DataField, Error, IndexSpec};
use harbor_jobs::SearchRequest;

use crate::error::ApiError;
use crate::service::{Ack, AnalyserService, IngestPoint, SearchStatus};

type AppState = Arc<AnalyserService>;

pub fn router(service: Arc<AnalyserService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/plugins", get(list_plugins))
        .route("/analyse", post(analyse))
        .route("/points", post(add_points))
        .route("/collections", get(list_collections).post(create_collection))
        .route("/collections/:name", delete(delete_collection))
        .route("/search", post(search))
        .route("/search/:id", get(search_result))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(indexing_status))
        .with_state(service)
}

async fn health(State(service): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "harbor",
        "version": env!("CARGO_PKG_VERSION"),
        "collections": service.list_collections().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_plugins(State(service): State<AppState>) -> Json<Value> {
    Json(json!({
        "plugins": service.list_plugins(),
        "registered": service.registered_types(),
    }))
}

#[derive(Debug, Deserialize)]
struct AnalyseBody {
    plugin: String,
    #[serde(default)]
    inputs: Vec<DataField>,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
}

async fn analyse(State(service): State<AppState>, Json(body): Json<AnalyseBody>) -> Result<Response, ApiError> {
    let result = service.analyse(&body.plugin, body.inputs, body.parameters).await?;
    Ok(Json(result).into_response())
}

async fn add_points(State(service): State<AppState>, Json(points): Json<Vec<IngestPoint>>) -> Json<Vec<Ack>> {
    let acks = service.add_points(futures::stream::iter(points));
    Json(acks.collect().await)
}

#[derive(Debug, Deserialize)]
struct CreateCollectionBody {
    name: String,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
}

async fn create_collection(
    State(service): State<AppState>,
    Json(body): Json<CreateCollectionBody>,
) -> Result<Response, ApiError> {
    service.create_collection(&body.name, &body.indexes).await?;
    Ok((StatusCode::CREATED, Json(json!({"name": body.name}))).into_response())
}

async fn delete_collection(State(service): State<AppState>, Path(name): Path<String>) -> Result<Response, ApiError> {
    if service.delete_collection(&name).await? {
        Ok(Json(json!({"name": name, "deleted": true})).into_response())
    } else {
        Err(Error::NotFound(format!("collection \"{name}\"")).into())
    }
}

async fn list_collections(State(service): State<AppState>) -> Json<Value> {
    Json(json!({"collections": service.list_collections().await}))
}

async fn search(State(service): State<AppState>, Json(request): Json<SearchRequest>) -> Response {
    let job_id = service.search(request).await;
    (StatusCode::ACCEPTED, Json(json!({"job_id": job_id}))).into_response()
}

/// 200 with results, 412 while the job runs, 500 when it failed, 404 for an
/// unknown id.
async fn search_result(State(service): State<AppState>, Path(id): Path<String>) -> Response {
    match service.list_search_result(&id).await {
        SearchStatus::Done(results) => Json(json!({"job_id": id, "results": results})).into_response(),
        SearchStatus::Running => {
            (StatusCode::PRECONDITION_FAILED, Json(json!({"job_id": id, "status": "running"}))).into_response()
        }
        SearchStatus::Error(message) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"job_id": id, "error": message}))).into_response()
        }
        SearchStatus::NotFound => ApiError::from(Error::NotFound(format!("search job {id}"))).into_response(),
    }
}

async fn list_jobs(State(service): State<AppState>) -> Json<Value> {
    Json(json!({"jobs": service.indexing_jobs().await}))
}

async fn indexing_status(State(service): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let record = service
        .indexing_status(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("indexing job {id}")))?;
    Ok(Json(record).into_response())
}
