use async_trait::async_trait;

use crate::errors::RelayError;
use crate::ids::{RunId, UploadIdentifier};

/// Hand-off from upload finalization to the downstream workflow.
///
/// The finalize gate calls this exactly once per committed object under
/// correct operation; implementations start one workflow run and return its id.
#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    async fn launch(&self, identifier: &UploadIdentifier) -> Result<RunId, RelayError>;
}
