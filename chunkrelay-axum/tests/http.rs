use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::response::Response;
use axum::Router;
use chunkrelay_axum::{relay, RelayState};
use chunkrelay_blob::{BlobConfig, FinalizeGate, MemoryBlockStore, MemoryUploadSessionStore};
use chunkrelay_core::RunId;
use chunkrelay_pipeline::{
    MemoryResultStore, MemoryWorkflowEngine, PipelineTrigger, ResultCollection, ResultFetcher,
    StaticTokenProvider, StatusPoller,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "chunkrelay-test-boundary";

struct TestApp {
    router: Router,
    blocks: MemoryBlockStore,
    engine: MemoryWorkflowEngine,
    results: MemoryResultStore,
}

fn build() -> TestApp {
    let blocks = MemoryBlockStore::new();
    let engine = MemoryWorkflowEngine::new();
    let results = MemoryResultStore::new();
    let tokens = Arc::new(StaticTokenProvider::new("test-token"));

    let trigger = PipelineTrigger::new(Arc::new(engine.clone()), tokens.clone(), "csv-to-cosmos");
    let gate = FinalizeGate::new(
        Arc::new(blocks.clone()),
        Arc::new(MemoryUploadSessionStore::new()),
        Arc::new(trigger),
        BlobConfig::default(),
    )
    .unwrap();
    let state = RelayState::new(
        gate,
        StatusPoller::new(Arc::new(engine.clone()), tokens.clone()),
        ResultFetcher::new(Arc::new(results.clone()), tokens),
    );

    TestApp {
        router: relay(state).router,
        blocks,
        engine,
        results,
    }
}

async fn json_body(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Multipart form shaped like the one resumable.js posts
fn chunk_request(identifier: &str, number: u32, total: u32, data: &str) -> Request<Body> {
    let mut body = String::new();
    let fields = [
        ("chunkNumber", number.to_string()),
        ("chunkSize", "1048576".to_string()),
        ("totalChunks", total.to_string()),
        ("identifier", identifier.to_string()),
        ("filename", "data.csv".to_string()),
        ("relativePath", "data.csv".to_string()),
    ];
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n{data}\r\n--{BOUNDARY}--\r\n"
    ));

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> Response {
    app.router.clone().oneshot(req).await.unwrap()
}

#[tokio::test]
async fn health_ok() {
    let app = build();

    let res = send(&app, get("/health")).await;

    assert_eq!(res.status().as_u16(), 200);
    assert!(res.headers().get("x-request-id").is_some());
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), "ok");
}

#[tokio::test]
async fn request_id_is_preserved_when_provided() {
    let app = build();
    let provided = HeaderValue::from_static("req-test-123");

    let mut req = get("/health");
    req.headers_mut().insert("x-request-id", provided.clone());
    let res = send(&app, req).await;

    assert_eq!(res.headers().get("x-request-id").unwrap(), &provided);
}

#[tokio::test]
async fn healthcheck_reports_block_store_reachability() {
    let app = build();
    assert_eq!(send(&app, get("/upload/healthcheck")).await.status().as_u16(), 200);

    app.blocks.set_unavailable(true);
    let res = send(&app, get("/upload/healthcheck")).await;

    assert_eq!(res.status().as_u16(), 503);
    let body = json_body(res).await;
    assert_eq!(body["className"], "unavailable");
    assert_eq!(body["data"]["retryable"], true);
}

#[tokio::test]
async fn abc123_upload_runs_the_pipeline_once() {
    let app = build();
    let probe = "/upload?chunkNumber=1&totalChunks=3&identifier=abc123&filename=data.csv";
    assert_eq!(send(&app, get(probe)).await.status().as_u16(), 204);

    let res = send(&app, chunk_request("abc123", 2, 3, "2,b")).await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(
        json_body(res).await,
        json!({ "chunksReceived": 1, "totalChunks": 3 })
    );

    send(&app, chunk_request("abc123", 1, 3, "1,a")).await;
    assert_eq!(send(&app, get(probe)).await.status().as_u16(), 200);

    let res = send(&app, chunk_request("abc123", 3, 3, "3,c")).await;
    assert_eq!(res.status().as_u16(), 200);
    let run_id = json_body(res).await["pipelineRunId"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(!run_id.is_empty());

    let res = send(&app, chunk_request("abc123", 3, 3, "3,c")).await;
    assert_eq!(json_body(res).await["pipelineRunId"], run_id.as_str());
    assert_eq!(app.blocks.commit_calls(), 1);
    assert_eq!(app.engine.starts(), 1);

    let object = app.blocks.object("abc123").unwrap();
    assert_eq!(&object.data[..], b"1,a2,b3,c");

    let res = send(&app, get(&format!("/upload/pipeline-status/{run_id}"))).await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(json_body(res).await, json!({ "Status": "Queued" }));
}

#[tokio::test]
async fn conflicting_chunk_is_409() {
    let app = build();
    send(&app, chunk_request("clash", 1, 2, "first")).await;

    let res = send(&app, chunk_request("clash", 1, 2, "other")).await;

    assert_eq!(res.status().as_u16(), 409);
    let body = json_body(res).await;
    assert_eq!(body["name"], "Conflict");
    assert_eq!(body["className"], "conflict");
    assert_eq!(body["data"]["retryable"], true);
}

#[tokio::test]
async fn malformed_requests_are_400() {
    let app = build();

    let res = send(&app, get("/upload?chunkNumber=x&totalChunks=3&identifier=abc")).await;
    assert_eq!(res.status().as_u16(), 400);
    assert!(json_body(res).await.get("errors").is_some());

    let res = send(&app, get("/upload?chunkNumber=1&totalChunks=3&identifier=..")).await;
    assert_eq!(res.status().as_u16(), 400);

    send(&app, chunk_request("shape", 1, 3, "a")).await;
    let res = send(&app, chunk_request("shape", 2, 5, "b")).await;
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["data"]["retryable"], false);

    let res = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn failed_trigger_is_502_and_retry_recovers() {
    let app = build();
    app.engine.fail_next_starts(1);

    let res = send(&app, chunk_request("retry-me", 1, 1, "only")).await;
    assert_eq!(res.status().as_u16(), 502);
    assert_eq!(json_body(res).await["data"]["retryable"], true);

    let finalize = Request::builder()
        .method("POST")
        .uri("/upload/retry-me/finalize")
        .body(Body::empty())
        .unwrap();
    let res = send(&app, finalize).await;
    assert_eq!(res.status().as_u16(), 200);
    assert!(json_body(res).await["pipelineRunId"].is_string());
    assert_eq!(app.blocks.commit_calls(), 1);
}

#[tokio::test]
async fn credential_failure_is_not_retryable() {
    let app = build();
    app.engine.set_reject_credentials(true);

    let res = send(&app, chunk_request("denied", 1, 1, "only")).await;

    assert_eq!(res.status().as_u16(), 500);
    let body = json_body(res).await;
    assert_eq!(body["data"]["retryable"], false);
    assert_eq!(body["data"]["reason"], "credential");
}

#[tokio::test]
async fn retry_on_incomplete_upload_is_409() {
    let app = build();
    send(&app, chunk_request("half", 1, 2, "a")).await;

    let res = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/upload/half/finalize")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(res.status().as_u16(), 409);
}

#[tokio::test]
async fn unknown_run_status_is_404() {
    let app = build();

    let res = send(&app, get("/upload/pipeline-status/does-not-exist")).await;

    assert_eq!(res.status().as_u16(), 404);
    assert_eq!(json_body(res).await["name"], "NotFound");
}

#[tokio::test]
async fn data_pages_are_bounded() {
    let app = build();
    let run_id = RunId::from_string("run-1".into());
    app.results.insert(
        &run_id,
        ResultCollection::Accepted,
        (0..25).map(|i| json!({ "id": i })).collect(),
    );
    app.results.insert(
        &run_id,
        ResultCollection::Rejected,
        vec![json!({ "id": 99, "error": "bad date" })],
    );

    let res = send(&app, get("/upload/data/run-1?page=2&itemsPerPage=10")).await;
    assert_eq!(res.status().as_u16(), 200);
    let body = json_body(res).await;
    assert_eq!(body["Items"].as_array().unwrap().len(), 10);
    assert_eq!(body["Items"][0], json!({ "id": 10 }));
    assert_eq!(body["Errors"], json!([]));

    let res = send(&app, get("/upload/data/run-1?page=1&itemsPerPage=1000")).await;
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn run_ids_with_path_syntax_are_400() {
    let app = build();

    for uri in [
        "/upload/pipeline-status/..%2Fpipelines%2Fother%2FcreateRun%3Fx=",
        "/upload/pipeline-status/run%201",
        "/upload/data/..%2F..%2Fadmin?page=1&itemsPerPage=10",
    ] {
        let res = send(&app, get(uri)).await;
        assert_eq!(res.status().as_u16(), 400, "{uri}");
        assert_eq!(json_body(res).await["name"], "BadRequest", "{uri}");
    }
    assert!(app.results.queries().is_empty());
    assert_eq!(app.engine.run_count(), 0);
}
