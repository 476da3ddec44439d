#![cfg(feature = "lance")]

use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;

use harbor_core::{Error, Filter, IndexPoint, IndexSpec, IndexerPlugin, PluginConfig, VectorQuery};
use harbor_index::{init_collection, LanceIndexer};

fn uri(tmp: &TempDir) -> String {
    tmp.path().join("lancedb").to_string_lossy().into_owned()
}

fn point(id: &str, origin: &str, v: Vec<f32>) -> IndexPoint {
    IndexPoint {
        id: id.into(),
        payload: json!({"origin_name": origin}).as_object().cloned().unwrap(),
        vectors: BTreeMap::from([("clip_text".to_string(), vec![v])]),
    }
}

#[tokio::test]
async fn registry_constructor_opens_lazily_on_a_current_thread_runtime() {
    let tmp = TempDir::new().expect("tmp");
    let config = PluginConfig::new("wikimedia", json!({"uri": uri(&tmp)}));
    let indexer = LanceIndexer::from_config(&config).expect("indexer");
    assert!(indexer.list_collections().await.unwrap().is_empty());

    let missing = LanceIndexer::from_config(&PluginConfig::new("wikimedia", serde_json::Value::Null));
    assert!(matches!(missing, Err(Error::Config(_))));
}

#[tokio::test]
async fn collections_persist_and_sizes_are_checked() {
    let tmp = TempDir::new().expect("tmp");
    let indexer = LanceIndexer::open(&uri(&tmp)).await.expect("open");
    init_collection(&indexer, "wikimedia", &[IndexSpec::new("clip_text", 4)]).await.unwrap();
    assert!(indexer.create_collection("wikimedia", &[]).await.is_err());

    let reopened = LanceIndexer::open(&uri(&tmp)).await.expect("reopen");
    assert_eq!(reopened.list_collections().await.unwrap(), vec!["wikimedia".to_string()]);
    assert_eq!(reopened.get_indexes("wikimedia").await.unwrap(), Some(vec![IndexSpec::new("clip_text", 4)]));

    let mismatch = init_collection(&reopened, "wikimedia", &[IndexSpec::new("clip_text", 8)]).await;
    assert!(matches!(mismatch, Err(Error::Config(msg)) if msg.contains("clip_text")));
    init_collection(&reopened, "wikimedia", &[IndexSpec::new("clip_text", 4)]).await.unwrap();
}

#[tokio::test]
async fn upsert_replaces_previous_point() {
    let tmp = TempDir::new().expect("tmp");
    let indexer = LanceIndexer::open(&uri(&tmp)).await.expect("open");
    indexer.create_collection("wikimedia", &[IndexSpec::new("clip_text", 2)]).await.unwrap();

    indexer.add_points("wikimedia", vec![point("p1", "met", vec![1.0, 0.0])]).await.unwrap();
    indexer.add_points("wikimedia", vec![point("p1", "wikidata", vec![0.0, 1.0])]).await.unwrap();

    let q = VectorQuery { index_name: "clip_text".into(), vector: vec![0.0, 1.0], weight: 1.0 };
    let hits = indexer.search("wikimedia", &[q], &[], 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload["origin_name"], "wikidata");
    assert!((hits[0].score - 1.0).abs() < 1e-4);

    let wrong = indexer.add_points("wikimedia", vec![point("p2", "met", vec![1.0, 0.0, 0.0])]).await;
    assert!(matches!(wrong, Err(Error::VectorStore(_))));
}

#[tokio::test]
async fn filtered_scan_scores_one() {
    let tmp = TempDir::new().expect("tmp");
    let indexer = LanceIndexer::open(&uri(&tmp)).await.expect("open");
    indexer.create_collection("wikimedia", &[IndexSpec::new("clip_text", 2)]).await.unwrap();
    indexer
        .add_points(
            "wikimedia",
            vec![point("a1", "wikidata", vec![1.0, 0.0]), point("b2", "met", vec![0.0, 1.0]), point("c3", "wikidata", vec![1.0, 1.0])],
        )
        .await
        .unwrap();

    let hits = indexer.search("wikimedia", &[], &[Filter::must("origin_name", "wikidata")], 100).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["a1", "c3"]);
    assert!(hits.iter().all(|h| h.score == 1.0));

    assert!(indexer.delete_collection("wikimedia").await.unwrap());
    assert!(matches!(indexer.search("wikimedia", &[], &[], 10).await, Err(Error::NotFound(_))));
}
