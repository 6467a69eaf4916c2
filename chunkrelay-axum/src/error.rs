use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chunkrelay_blob::BlobError;
use chunkrelay_core::RelayError;
use chunkrelay_pipeline::PipelineError;

#[derive(Debug)]
pub struct RelayAxumError(pub anyhow::Error);

impl From<anyhow::Error> for RelayAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<RelayError> for RelayAxumError {
    fn from(e: RelayError) -> Self {
        Self(e.into_anyhow())
    }
}

impl From<BlobError> for RelayAxumError {
    fn from(e: BlobError) -> Self {
        RelayError::from(e).into()
    }
}

impl From<PipelineError> for RelayAxumError {
    fn from(e: PipelineError) -> Self {
        RelayError::from(e).into()
    }
}

impl IntoResponse for RelayAxumError {
    fn into_response(self) -> Response {
        // Keep the structured fields even when wrapped in anyhow context
        let safe = match self.0.chain().find_map(|e| e.downcast_ref::<RelayError>()) {
            Some(relay) => relay.sanitize_for_client(),
            None => RelayError::general_error(self.0.to_string()),
        };

        let status =
            StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(
                status = status.as_u16(),
                retryable = safe.retryable,
                error = %self.0,
                "request failed"
            );
        }
        (status, Json(safe.to_json())).into_response()
    }
}
