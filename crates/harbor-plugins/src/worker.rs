//! HTTP side of `RemoteInference`: serves every hosted plugin at
//! `POST /<instance_name>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use harbor_core::{ComputePlugin, Error};

use crate::inference::RemoteRequest;

#[derive(Clone)]
struct WorkerState {
    plugins: Arc<HashMap<String, Arc<dyn ComputePlugin>>>,
}

pub fn worker_router(plugins: Vec<Arc<dyn ComputePlugin>>) -> Router {
    let plugins: HashMap<String, Arc<dyn ComputePlugin>> =
        plugins.into_iter().map(|p| (p.instance_name().to_string(), p)).collect();
    info!(hosted = plugins.len(), "worker router ready");
    Router::new()
        .route("/health", get(health))
        .route("/:instance", post(run_plugin))
        .with_state(WorkerState { plugins: Arc::new(plugins) })
}

async fn health(State(state): State<WorkerState>) -> Json<serde_json::Value> {
    let mut hosted: Vec<&String> = state.plugins.keys().collect();
    hosted.sort();
    Json(json!({
        "status": "healthy",
        "plugins": hosted,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn run_plugin(
    State(state): State<WorkerState>,
    Path(instance): Path<String>,
    Json(request): Json<RemoteRequest>,
) -> Response {
    let Some(plugin) = state.plugins.get(&instance).cloned() else {
        let body = Json(json!({"error": format!("Unknown plugin: {instance}"), "status": 404}));
        return (StatusCode::NOT_FOUND, body).into_response();
    };
    let run = request.inputs;
    let outcome = tokio::task::spawn_blocking(move || plugin.call(&run))
        .await
        .map_err(|e| Error::Inference(e.to_string()))
        .and_then(|r| r);
    match outcome {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            error!(%instance, error = %e, "worker plugin run failed");
            let body = Json(json!({"error": e.to_string(), "status": 500}));
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}
