mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use curator::batch::BatchRunner;
use curator::exclusion::ExclusionFilter;
use curator::models::{Candidate, Medium, RunStatus};
use curator::pipeline::ResolutionPipeline;
use curator::resolver::MetadataResolver;
use curator::server::{router, AppState};
use curator::store::memory::InMemoryStore;
use curator::store::Store;

use common::{category, FakeCatalog, FakeSource};

async fn spawn(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn runner(store: Arc<InMemoryStore>) -> Arc<BatchRunner> {
    let catalog = FakeCatalog::new().with("Chernobyl", Medium::Tv, 87108);
    let resolver = MetadataResolver::new(Arc::new(catalog), store.clone());
    let pipeline = ResolutionPipeline::new(resolver, store.clone(), ExclusionFilter::default());
    let source =
        FakeSource::new().with("Docudrama", vec![Candidate::new("Chernobyl", 2019, "tv")]);
    Arc::new(BatchRunner::new(
        store,
        pipeline,
        Arc::new(source),
        vec![category("Docudrama")],
        10,
    ))
}

#[tokio::test]
async fn health_and_categories() {
    let store = Arc::new(InMemoryStore::new());
    let base = spawn(AppState::new(store, None, vec![category("Docudrama")])).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/v1/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["batch_running"], false);

    let categories: Value = client
        .get(format!("{}/v1/categories", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(categories[0]["label"], "Docudrama");
}

#[tokio::test]
async fn missing_runs_are_404_with_error_body() {
    let store = Arc::new(InMemoryStore::new());
    let base = spawn(AppState::new(store, None, vec![category("Docudrama")])).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/v1/runs/latest", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/v1/recs/Unknown/latest", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/v1/run", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn run_trigger_is_refused_while_batch_in_flight() {
    let store = Arc::new(InMemoryStore::new());
    let runner = runner(store.clone());
    let base = spawn(AppState::new(
        store,
        Some(runner.clone()),
        vec![category("Docudrama")],
    ))
    .await;
    let client = reqwest::Client::new();

    let permit = runner.try_acquire().unwrap();
    let resp = client
        .post(format!("{}/v1/run", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "batch_in_flight");
    drop(permit);
}

#[tokio::test]
async fn triggered_batch_publishes_latest_recs() {
    let store = Arc::new(InMemoryStore::new());
    let runner = runner(store.clone());
    let base = spawn(AppState::new(
        store.clone(),
        Some(runner),
        vec![category("Docudrama")],
    ))
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/run", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let mut finished = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(job) = store.latest_job().await.unwrap() {
            if job.status == RunStatus::Completed {
                finished = true;
                break;
            }
        }
    }
    assert!(finished, "batch did not finish");

    let latest: Value = client
        .get(format!("{}/v1/runs/latest", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["job"]["mode"], "api");
    assert_eq!(latest["categories"][0]["status"], "completed");

    let recs: Value = client
        .get(format!("{}/v1/recs/Docudrama/latest", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(recs["category"], "Docudrama");
    assert_eq!(recs["items"][0]["canonical_id"], 87108);
    assert_eq!(recs["items"][0]["medium"], "tv");
    assert!(recs["resolved_at"].is_string());
}
