use std::sync::Arc;

use chunkrelay_core::RunId;

use crate::{PipelineError, PipelineResult, RunStatus, TokenProvider, WorkflowEngine};

/// Reports a run's status as the engine states it. No caching.
#[derive(Clone)]
pub struct StatusPoller {
    engine: Arc<dyn WorkflowEngine>,
    tokens: Arc<dyn TokenProvider>,
}

impl StatusPoller {
    pub fn new(engine: Arc<dyn WorkflowEngine>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { engine, tokens }
    }

    pub async fn status(&self, run_id: &RunId) -> PipelineResult<RunStatus> {
        if run_id.as_str().trim().is_empty() {
            return Err(PipelineError::invalid("run id is empty"));
        }
        let token = self.tokens.token().await?;
        self.engine.run_status(&token, run_id).await
    }
}
