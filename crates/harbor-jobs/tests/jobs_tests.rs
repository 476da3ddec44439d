use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use harbor_core::config::Config;
use harbor_core::{DataField, DataPoint, Error, FieldValue, FilterFlag};
use harbor_jobs::{run_indexing, run_search, JobOutput, PollStatus, SearchRequest, SearchTerm, SharedContext};

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
params = { embedding_size = 16 }

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
fields = ["meta/title"]
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

async fn context() -> (TempDir, Arc<SharedContext>) {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), CONFIG).unwrap();
    let app = Config::load_from(tmp.path()).unwrap().app().unwrap();
    let ctx = SharedContext::from_config(&app).await.unwrap();
    (tmp, ctx)
}

fn painting(id: &str, title: &str, origin: &str, medium: &str) -> DataPoint {
    let meta = json!({"title": title, "medium": medium});
    DataPoint::new(id)
        .with_field("image", FieldValue::image(title.as_bytes().to_vec(), "jpg"))
        .unwrap()
        .with_field("meta", FieldValue::Meta { meta: meta.as_object().cloned().unwrap() })
        .unwrap()
        .with_field("origin_name", FieldValue::text(origin))
        .unwrap()
        .with_field("title/_de", FieldValue::text_with_language(title, "de"))
        .unwrap()
}

async fn seeded() -> (TempDir, Arc<SharedContext>) {
    let (tmp, ctx) = context().await;
    for p in [
        painting("p-arethusa", "Arethusa", "wikidata", "oil paint"),
        painting("p-winter", "Winter landscape", "wikidata", "canvas"),
        painting("p-harbor", "Fishing harbor", "commons", "oil paint"),
    ] {
        ctx.data.save_point(&p).unwrap();
    }
    let ids: Vec<String> = ["p-arethusa", "p-winter", "p-harbor"].iter().map(|s| s.to_string()).collect();
    let report = run_indexing(&ctx.data, &ctx.inference, &ctx.collections, "wikimedia", &ids).await.unwrap();
    assert_eq!(report.indexed, 3);
    (tmp, ctx)
}

fn text_term(text: &str, indexes: &[&str]) -> SearchTerm {
    SearchTerm::Vector {
        inputs: vec![DataField::new("text", FieldValue::text(text))],
        indexes: indexes.iter().map(|s| s.to_string()).collect(),
        weight: 1.0,
    }
}

#[tokio::test]
async fn text_vector_term_finds_matching_title() {
    let (_tmp, ctx) = seeded().await;
    let request = SearchRequest { terms: vec![text_term("Arethusa", &["clip_text"])], ..Default::default() };
    let results = run_search(&ctx.data, &ctx.inference, &ctx.collections, &request, ctx.max_results).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "p-arethusa");
    assert!((results[0].score - 1.0).abs() < 1e-4);
    assert_eq!(results[0].meta["meta/title"], "Arethusa");
    assert_eq!(results[0].meta["origin_name"], "wikidata");
}

#[tokio::test]
async fn filters_without_vector_terms_scan_with_unit_score() {
    let (_tmp, ctx) = seeded().await;
    let request = SearchRequest {
        terms: vec![
            SearchTerm::Text { field: "origin_name".into(), query: json!("wikidata"), flag: FilterFlag::Must },
            SearchTerm::Text { field: "meta/medium".into(), query: json!("canvas"), flag: FilterFlag::Not },
        ],
        ..Default::default()
    };
    let results = run_search(&ctx.data, &ctx.inference, &ctx.collections, &request, ctx.max_results).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["p-arethusa"]);
    assert_eq!(results[0].score, 1.0);
}

#[tokio::test]
async fn hydration_selects_fields_and_splits_language() {
    let (_tmp, ctx) = seeded().await;
    let request = SearchRequest {
        terms: vec![text_term("Fishing harbor", &[])],
        size: Some(1),
        fields: vec!["title/*".into(), "meta/title".into()],
        ..Default::default()
    };
    let results = run_search(&ctx.data, &ctx.inference, &ctx.collections, &request, ctx.max_results).await.unwrap();
    assert_eq!(results.len(), 1);
    let hit = &results[0];
    assert_eq!(hit.id, "p-harbor");
    let names: Vec<(&str, Option<&str>)> = hit.fields.iter().map(|f| (f.name.as_str(), f.language.as_deref())).collect();
    assert_eq!(names, [("meta/title", None), ("title", Some("de"))]);
}

#[tokio::test]
async fn scores_are_averaged_across_terms() {
    let (_tmp, ctx) = seeded().await;
    let single = SearchRequest { terms: vec![text_term("Arethusa", &["clip_text"])], ..Default::default() };
    let both = SearchRequest {
        terms: vec![text_term("Arethusa", &["clip_text"]), text_term("Fishing harbor", &["clip_text"])],
        ..Default::default()
    };
    let one = run_search(&ctx.data, &ctx.inference, &ctx.collections, &single, 100).await.unwrap();
    let two = run_search(&ctx.data, &ctx.inference, &ctx.collections, &both, 100).await.unwrap();

    let score = |list: &[harbor_jobs::SearchResultEntry], id: &str| list.iter().find(|r| r.id == id).unwrap().score;
    // arethusa scores 1.0 on the first term, so the mean must drop below it
    assert!(score(&two, "p-arethusa") < score(&one, "p-arethusa"));
    assert!(score(&two, "p-arethusa") <= 1.0);
}

#[tokio::test]
async fn unknown_collection_fails_the_job() {
    let (_tmp, ctx) = seeded().await;
    let request = SearchRequest { collections: vec!["nope".into()], ..Default::default() };
    let job = ctx.submit_search(request).await;
    match ctx.jobs.wait(&job, Duration::from_secs(5)).await {
        PollStatus::Error(message) => assert!(message.contains("nope")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn failed_points_do_not_block_the_rest() {
    let (_tmp, ctx) = context().await;
    ctx.data.save_point(&painting("p-ok", "Arethusa", "wikidata", "oil paint")).unwrap();
    let ids = vec!["p-ok".to_string(), "p-missing".to_string()];
    let err = run_indexing(&ctx.data, &ctx.inference, &ctx.collections, "wikimedia", &ids).await.err().unwrap();
    assert!(matches!(&err, Error::PartialWrite(c, detail) if c == "wikimedia" && detail.contains("p-missing")));

    let job = ctx.submit_search(SearchRequest::default()).await;
    match ctx.jobs.wait(&job, Duration::from_secs(5)).await {
        PollStatus::Done(JobOutput::Search(results)) => {
            assert_eq!(results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["p-ok"]);
        }
        other => panic!("unexpected {other:?}"),
    }
}
