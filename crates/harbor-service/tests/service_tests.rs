use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures::StreamExt;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use harbor_core::config::Config;
use harbor_core::{DataField, DataPoint, FieldValue, IndexSpec};
use harbor_jobs::{JobState, SearchRequest, SearchTerm, SharedContext};
use harbor_service::{router, AckStatus, AnalyserService, IngestPoint, SearchStatus};

const CONFIG: &str = r#"
[data]
data_dir = "store"

[[compute_plugin]]
name = "ClipText"
type = "TextEmbedding"
params = { embedding_size = 64 }

[[compute_plugin]]
name = "ClipImage"
type = "ImageHistogram"
params = { embedding_size = 32 }

[[collection]]
name = "wikimedia"
payload_fields = ["origin_name", "meta/*"]

[[collection.indexing_plugin]]
index_name = "clip_image"
compute_plugin = "ClipImage"
fields = ["image"]

[[collection.indexing_plugin]]
index_name = "clip_text"
compute_plugin = "ClipText"
fields = ["meta/*"]
input_mapping = { "meta/*" = "text" }

[[collection.search_plugin]]
index_name = "clip_text"
compute_plugin = "ClipText"
fields = ["text"]

[[collection.search_plugin]]
index_name = "clip_image"
compute_plugin = "ClipImage"
fields = ["image"]
"#;

const TWO_MUSEUMS: &str = r#"
[data]
data_dir = "store"

[[compute_plugin]]
name = "ClipText"
type = "TextEmbedding"
params = { embedding_size = 32 }

[[collection]]
name = "museum_a"
payload_fields = ["meta/*"]

[[collection.indexing_plugin]]
index_name = "clip_text"
compute_plugin = "ClipText"
fields = ["meta/title"]
input_mapping = { "meta/title" = "text" }

[[collection]]
name = "museum_b"
payload_fields = ["meta/*"]

[[collection.indexing_plugin]]
index_name = "clip_text"
compute_plugin = "ClipText"
fields = ["meta/title"]
input_mapping = { "meta/title" = "text" }
"#;

async fn service() -> (TempDir, Arc<AnalyserService>) {
    service_with(CONFIG).await
}

async fn service_with(config: &str) -> (TempDir, Arc<AnalyserService>) {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), config).unwrap();
    let app = Config::load_from(tmp.path()).unwrap().app().unwrap();
    let ctx = SharedContext::from_config(&app).await.unwrap();
    (tmp, Arc::new(AnalyserService::new(ctx)))
}

fn arethusa() -> DataPoint {
    DataPoint::new("arethusa-1887")
        .with_field("image", FieldValue::image(b"\xff\xd8\xff\xe0 painting bytes".to_vec(), "jpg"))
        .unwrap()
        .with_field("meta/title", FieldValue::text("Arethusa"))
        .unwrap()
        .with_field("origin_name", FieldValue::text("wikidata"))
        .unwrap()
}

fn other(id: &str, title: &str) -> DataPoint {
    DataPoint::new(id)
        .with_field("image", FieldValue::image(title.as_bytes().to_vec(), "png"))
        .unwrap()
        .with_field("meta/title", FieldValue::text(title))
        .unwrap()
}

async fn wait_for_indexing(service: &AnalyserService) {
    for _ in 0..500 {
        let jobs = service.indexing_jobs().await;
        if !jobs.is_empty() && jobs.iter().all(|j| j.state != JobState::Running) {
            assert!(jobs.iter().all(|j| j.state == JobState::Done), "{jobs:?}");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("indexing did not finish");
}

async fn wait_for_search(service: &AnalyserService, job_id: &str) -> SearchStatus {
    for _ in 0..500 {
        match service.list_search_result(job_id).await {
            SearchStatus::Running => tokio::time::sleep(Duration::from_millis(10)).await,
            status => return status,
        }
    }
    panic!("search did not finish");
}

async fn call(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn ingest_then_text_search_finds_the_painting() {
    let (_tmp, service) = service().await;
    let points: Vec<IngestPoint> = [arethusa(), other("winter-1", "Winter landscape"), other("harbor-1", "Fishing harbor")]
        .into_iter()
        .map(|p| IngestPoint::new("wikimedia", p))
        .collect();
    let acks: Vec<_> = service.add_points(futures::stream::iter(points)).collect().await;
    assert_eq!(acks.len(), 3);
    assert!(acks.iter().all(|a| a.status == AckStatus::Ok));
    assert_eq!(acks[0].id, "arethusa-1887");
    wait_for_indexing(&service).await;

    let request = SearchRequest {
        terms: vec![SearchTerm::Vector {
            inputs: vec![DataField::new("text", FieldValue::text("Arethusa"))],
            indexes: vec!["clip_text".into()],
            weight: 1.0,
        }],
        ..Default::default()
    };
    let job = service.search(request).await;
    match wait_for_search(&service, &job).await {
        SearchStatus::Done(results) => {
            assert_eq!(results[0].id, "arethusa-1887");
            assert!(results[0].score > 0.0);
            assert_eq!(results[0].meta["origin_name"], "wikidata");
            assert!(results[0].fields.iter().any(|f| f.name == "meta/title"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn points_are_indexed_only_into_their_collection() {
    let (_tmp, service) = service_with(TWO_MUSEUMS).await;
    let points = vec![
        IngestPoint::new("museum_a", other("only-for-a", "Arethusa")),
        IngestPoint::new("museum_b", other("only-for-b", "Winter landscape")),
        IngestPoint::new("atlantis", other("lost-1", "Sunken city")),
        IngestPoint::new("", other("lost-2", "Nowhere")),
    ];
    let acks: Vec<_> = service.add_points(futures::stream::iter(points)).collect().await;
    let statuses: Vec<AckStatus> = acks.iter().map(|a| a.status).collect();
    assert_eq!(statuses, [AckStatus::Ok, AckStatus::Ok, AckStatus::Error, AckStatus::Error]);
    assert!(acks[2].error.as_deref().unwrap().contains("atlantis"));
    assert!(service.context().data.load_point("lost-1").is_err());
    wait_for_indexing(&service).await;
    assert_eq!(service.indexing_jobs().await.len(), 2);

    for (collection, expected) in [("museum_a", "only-for-a"), ("museum_b", "only-for-b")] {
        let request = SearchRequest { collections: vec![collection.into()], ..Default::default() };
        let job = service.search(request).await;
        match wait_for_search(&service, &job).await {
            SearchStatus::Done(results) => {
                let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
                assert_eq!(ids, [expected], "hits of {collection}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn analyse_runs_a_plugin_directly() {
    let (_tmp, service) = service().await;
    let result = service
        .analyse("ClipText", vec![DataField::new("text", FieldValue::text("river nymph"))], Default::default())
        .await
        .unwrap();
    assert_eq!(result.features()[0].len(), 64);
    assert!(service.analyse("Nope", vec![], Default::default()).await.is_err());
    assert_eq!(service.list_plugins()["TextEmbedding"], vec!["ClipText".to_string()]);
}

#[tokio::test]
async fn runtime_collections_over_http() {
    let (_tmp, service) = service().await;
    let app = router(service.clone());

    let (status, _) =
        call(&app, Method::POST, "/collections", Some(json!({"name": "scratch", "indexes": [IndexSpec::new("v", 4)]})))
            .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&app, Method::GET, "/collections", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collections"], json!(["scratch", "wikimedia"]));

    let (status, body) = call(&app, Method::POST, "/collections", Some(json!({"name": "  ", "indexes": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "config");

    let (status, _) = call(&app, Method::DELETE, "/collections/scratch", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, Method::DELETE, "/collections/scratch", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn search_over_http_reports_job_states() {
    let (_tmp, service) = service().await;
    let app = router(service.clone());

    let (status, body) = call(
        &app,
        Method::POST,
        "/points",
        Some(serde_json::to_value(vec![IngestPoint::new("wikimedia", arethusa())]).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["status"], "ok");
    wait_for_indexing(&service).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/search",
        Some(json!({"terms": [{"type": "text", "field": "origin_name", "query": "wikidata"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();
    wait_for_search(&service, &job_id).await;

    let (status, body) = call(&app, Method::GET, &format!("/search/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["id"], "arethusa-1887");
    assert_eq!(body["results"][0]["score"], 1.0);

    let (status, body) = call(&app, Method::POST, "/search", Some(json!({"collections": ["nope"]}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let failed = body["job_id"].as_str().unwrap().to_string();
    wait_for_search(&service, &failed).await;
    let (status, _) = call(&app, Method::GET, &format!("/search/{failed}"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = call(&app, Method::GET, "/search/unknown-job", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::GET, "/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let index_job = body["jobs"][0]["id"].as_str().unwrap().to_string();
    let (status, body) = call(&app, Method::GET, &format!("/jobs/{index_job}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "done");
    assert_eq!(body["result"]["data"]["indexed"], 1);
}
