use std::sync::Arc;

use async_trait::async_trait;
use chunkrelay_core::{PipelineLauncher, RelayError, RunId, UploadIdentifier};
use serde_json::json;

use crate::{PipelineResult, TokenProvider, WorkflowEngine};

/// Starts the ingestion workflow for a committed upload
#[derive(Clone)]
pub struct PipelineTrigger {
    engine: Arc<dyn WorkflowEngine>,
    tokens: Arc<dyn TokenProvider>,
    pipeline: String,
}

impl PipelineTrigger {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        tokens: Arc<dyn TokenProvider>,
        pipeline: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            tokens,
            pipeline: pipeline.into(),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// One workflow run with parameter `identifier` naming the committed object.
    pub async fn trigger(&self, identifier: &UploadIdentifier) -> PipelineResult<RunId> {
        let token = self.tokens.token().await?;
        let parameters = json!({ "identifier": identifier.as_str() });

        let run_id = self
            .engine
            .start_run(&token, &self.pipeline, &parameters)
            .await?;

        tracing::info!(
            identifier = %identifier,
            pipeline = %self.pipeline,
            run_id = %run_id,
            "pipeline run started"
        );
        Ok(run_id)
    }
}

#[async_trait]
impl PipelineLauncher for PipelineTrigger {
    async fn launch(&self, identifier: &UploadIdentifier) -> Result<RunId, RelayError> {
        self.trigger(identifier).await.map_err(RelayError::from)
    }
}
