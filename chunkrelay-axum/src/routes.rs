use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chunkrelay_blob::{ChunkOutcome, ChunkProbe};
use chunkrelay_core::{RelayError, RunId, UploadIdentifier};
use chunkrelay_pipeline::{PageRequest, ResultPage};
use serde::Deserialize;
use serde_json::json;

use crate::{multipart::read_chunk_form, RelayAxumError, RelayState};

fn map_query_rejection(rejection: QueryRejection) -> RelayAxumError {
    RelayError::bad_request("Failed to parse the query string")
        .with_errors(json!({ "_query": [rejection.body_text()] }))
        .into()
}

/// Resumable.js probe. Its other parameters (chunkSize, filename, ...) are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeQuery {
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub items_per_page: Option<u32>,
}

pub fn upload_router() -> Router<RelayState> {
    Router::new()
        .route("/", get(probe_chunk).post(upload_chunk))
        .route("/healthcheck", get(health_check))
        .route("/{identifier}/finalize", post(retry_finalize))
        .route("/pipeline-status/{run_id}", get(pipeline_status))
        .route("/data/{run_id}", get(pipeline_data))
}

async fn health_check(State(state): State<RelayState>) -> Result<&'static str, RelayAxumError> {
    state.gate.health().await.map_err(|e| {
        RelayError::unavailable(format!("block store unreachable: {e}"))
    })?;
    Ok("Connection to block store okay.")
}

async fn probe_chunk(
    State(state): State<RelayState>,
    query: Result<Query<ProbeQuery>, QueryRejection>,
) -> Result<StatusCode, RelayAxumError> {
    let Query(query) = query.map_err(map_query_rejection)?;
    let identifier = UploadIdentifier::parse(query.identifier)?;

    let probe = state
        .gate
        .probe(&identifier, query.chunk_number, query.total_chunks)
        .await?;

    // Resumable clients treat 204 as "send this chunk"
    Ok(match probe {
        ChunkProbe::Present => StatusCode::OK,
        ChunkProbe::Absent => StatusCode::NO_CONTENT,
    })
}

async fn upload_chunk(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, RelayAxumError> {
    let chunk = read_chunk_form(&headers, body, state.max_chunk_bytes()).await?;

    let body = match state.gate.accept_chunk(chunk).await? {
        ChunkOutcome::Progress {
            chunks_received,
            total_chunks,
        } => json!({ "chunksReceived": chunks_received, "totalChunks": total_chunks }),
        ChunkOutcome::Finalized { run_id } => json!({ "pipelineRunId": run_id }),
    };
    Ok(Json(body).into_response())
}

async fn retry_finalize(
    State(state): State<RelayState>,
    Path(identifier): Path<String>,
) -> Result<Json<serde_json::Value>, RelayAxumError> {
    let identifier = UploadIdentifier::parse(identifier)?;
    let run_id = state.gate.retry(&identifier).await?;
    Ok(Json(json!({ "pipelineRunId": run_id })))
}

async fn pipeline_status(
    State(state): State<RelayState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, RelayAxumError> {
    let run_id = RunId::parse(run_id)?;
    let status = state.status.status(&run_id).await?;
    Ok(Json(json!({ "Status": status })))
}

async fn pipeline_data(
    State(state): State<RelayState>,
    Path(run_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<ResultPage>, RelayAxumError> {
    let run_id = RunId::parse(run_id)?;
    let Query(query) = query.map_err(map_query_rejection)?;
    let request = PageRequest::new(
        query.page.unwrap_or(1),
        query
            .items_per_page
            .unwrap_or(state.results.max_items_per_page()),
    );

    let page = state.results.fetch(&run_id, request).await?;
    Ok(Json(page))
}
