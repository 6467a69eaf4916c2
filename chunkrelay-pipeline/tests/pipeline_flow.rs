use std::sync::Arc;

use chunkrelay_core::{ErrorKind, PipelineLauncher, RelayError, RunId, UploadIdentifier};
use chunkrelay_pipeline::{
    MemoryResultStore, MemoryWorkflowEngine, PageRequest, PipelineError, PipelineTrigger,
    RecordedQuery, ResultCollection, ResultFetcher, RunStatus, StaticTokenProvider, StatusPoller,
};
use serde_json::json;

fn tokens() -> Arc<StaticTokenProvider> {
    Arc::new(StaticTokenProvider::new("test-token"))
}

fn id(raw: &str) -> UploadIdentifier {
    UploadIdentifier::parse(raw).unwrap()
}

fn rows(prefix: &str, count: usize) -> Vec<serde_json::Value> {
    (0..count).map(|i| json!({ "row": format!("{prefix}-{i}") })).collect()
}

/// B1. Trigger passes the identifier and returns the engine's run id
#[tokio::test]
async fn test_trigger_starts_one_run() {
    let engine = MemoryWorkflowEngine::new();
    let trigger = PipelineTrigger::new(Arc::new(engine.clone()), tokens(), "csv-to-cosmos");

    let run_id = trigger.trigger(&id("abc123")).await.unwrap();

    let run = engine.run(&run_id).unwrap();
    assert_eq!(run.pipeline, "csv-to-cosmos");
    assert_eq!(run.parameters, json!({ "identifier": "abc123" }));
    assert_eq!(engine.starts(), 1);
}

/// B2. Start and credential failures stay distinguishable through the launcher seam
#[tokio::test]
async fn test_launch_failures_keep_their_class() {
    let engine = MemoryWorkflowEngine::new();
    let trigger = PipelineTrigger::new(Arc::new(engine.clone()), tokens(), "csv-to-cosmos");

    engine.fail_next_starts(1);
    let err: RelayError = trigger.launch(&id("abc123")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadGateway);
    assert!(err.retryable);

    engine.set_reject_credentials(true);
    let err = trigger.launch(&id("abc123")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::GeneralError);
    assert!(!err.retryable);
    assert_eq!(err.to_json()["data"]["reason"], "credential");
}

/// B3. Status is passed through, unknown names included
#[tokio::test]
async fn test_status_is_reported_verbatim() {
    let engine = MemoryWorkflowEngine::new();
    let trigger = PipelineTrigger::new(Arc::new(engine.clone()), tokens(), "p");
    let poller = StatusPoller::new(Arc::new(engine.clone()), tokens());
    let run_id = trigger.trigger(&id("abc123")).await.unwrap();

    assert_eq!(poller.status(&run_id).await.unwrap(), RunStatus::Queued);

    engine
        .set_status(&run_id, RunStatus::Other("Queued_Throttled".into()))
        .unwrap();
    let status = poller.status(&run_id).await.unwrap();
    assert_eq!(status.as_str(), "Queued_Throttled");

    let missing = poller
        .status(&RunId::from_string("no-such-run".into()))
        .await
        .unwrap_err();
    assert!(matches!(missing, PipelineError::RunNotFound { .. }));
}

/// B4. Page 2 of 10 reads only that range from the store
#[tokio::test]
async fn test_fetch_is_bounded_at_the_store() {
    let store = MemoryResultStore::new();
    let run_id = RunId::from_string("run-1".into());
    store.insert(&run_id, ResultCollection::Accepted, rows("ok", 35));
    store.insert(&run_id, ResultCollection::Rejected, rows("bad", 14));
    let fetcher = ResultFetcher::new(Arc::new(store.clone()), tokens());

    let page = fetcher.fetch(&run_id, PageRequest::new(2, 10)).await.unwrap();

    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items[0], json!({ "row": "ok-10" }));
    assert_eq!(page.errors.len(), 4);
    assert_eq!(page.errors[0], json!({ "row": "bad-10" }));

    let mut queries = store.queries();
    queries.sort_by_key(|q| q.collection.as_str());
    assert_eq!(
        queries,
        vec![
            RecordedQuery {
                run_id: "run-1".into(),
                collection: ResultCollection::Accepted,
                offset: 10,
                limit: 10,
            },
            RecordedQuery {
                run_id: "run-1".into(),
                collection: ResultCollection::Rejected,
                offset: 10,
                limit: 10,
            },
        ]
    );
}

/// B5. Out-of-range paging is a validation error and never reaches the store
#[tokio::test]
async fn test_fetch_rejects_bad_pages() {
    let store = MemoryResultStore::new();
    let fetcher = ResultFetcher::new(Arc::new(store.clone()), tokens()).with_max_items_per_page(50);
    let run_id = RunId::from_string("run-1".into());

    for request in [
        PageRequest::new(0, 10),
        PageRequest::new(1, 0),
        PageRequest::new(1, 51),
    ] {
        let err = fetcher.fetch(&run_id, request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Invalid { .. }));
    }
    assert!(store.queries().is_empty());

    let page = fetcher.fetch(&run_id, PageRequest::new(3, 50)).await.unwrap();
    assert!(page.items.is_empty() && page.errors.is_empty());
}

/// B6. Result store outages are retryable
#[tokio::test]
async fn test_fetch_surfaces_store_outage() {
    let store = MemoryResultStore::new();
    store.set_unavailable(true);
    let fetcher = ResultFetcher::new(Arc::new(store), tokens());

    let err = fetcher
        .fetch(&RunId::from_string("run-1".into()), PageRequest::new(1, 10))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(RelayError::from(err).code(), 503);
}
