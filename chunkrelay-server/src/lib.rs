pub mod settings;
mod sweeper;

use std::sync::Arc;

use anyhow::Result;
use chunkrelay_axum::{relay, RelayApp, RelayState};
use chunkrelay_blob::{BlockStore, FinalizeGate, MemoryBlockStore, MemoryUploadSessionStore, S3BlockStore};
use chunkrelay_pipeline::{
    ClientCredentialsTokenProvider, HttpResultStore, HttpWorkflowEngine, MemoryResultStore,
    MemoryWorkflowEngine, PipelineTrigger, ResultFetcher, ResultStore, StaticTokenProvider,
    StatusPoller, TokenProvider, WorkflowEngine,
};

pub use settings::Settings;
pub use sweeper::spawn_sweeper;

/// Wire the configured backends into the HTTP app.
pub async fn build(settings: &Settings) -> Result<RelayApp> {
    let blocks: Arc<dyn BlockStore> = match &settings.blob_backend {
        settings::BlobBackend::Memory => Arc::new(MemoryBlockStore::new()),
        settings::BlobBackend::S3(config) => Arc::new(S3BlockStore::connect(config.clone()).await),
    };

    let tokens: Arc<dyn TokenProvider> = match &settings.auth {
        Some(auth) => Arc::new(ClientCredentialsTokenProvider::new(auth.clone())?),
        None => Arc::new(StaticTokenProvider::new("dev-token")),
    };

    let engine: Arc<dyn WorkflowEngine> = match &settings.pipeline_backend {
        settings::PipelineBackend::Memory => Arc::new(MemoryWorkflowEngine::new()),
        settings::PipelineBackend::Http(config) => Arc::new(HttpWorkflowEngine::new(config.clone())?),
    };

    let results: Arc<dyn ResultStore> = match &settings.results_backend {
        settings::ResultsBackend::Memory => Arc::new(MemoryResultStore::new()),
        settings::ResultsBackend::Http(config) => Arc::new(HttpResultStore::new(config.clone())?),
    };

    let trigger = PipelineTrigger::new(
        Arc::clone(&engine),
        Arc::clone(&tokens),
        settings.pipeline_name.clone(),
    );
    let gate = FinalizeGate::new(
        blocks,
        Arc::new(MemoryUploadSessionStore::new()),
        Arc::new(trigger),
        settings.blob.clone(),
    )?;

    let state = RelayState::new(
        gate,
        StatusPoller::new(engine, Arc::clone(&tokens)),
        ResultFetcher::new(results, tokens).with_max_items_per_page(settings.max_items_per_page),
    );

    tracing::info!(
        blob_backend = settings.blob_backend.name(),
        pipeline = %settings.pipeline_name,
        "chunkrelay wired"
    );
    Ok(relay(state))
}
