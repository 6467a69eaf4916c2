use chunkrelay_core::RelayError;
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while talking to the token endpoint, the workflow engine or
/// the result store
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Service credential could not be obtained or was refused.
    #[error("Credential error: {message}")]
    Credential { message: String },

    /// The workflow engine did not start the run.
    #[error("Workflow start failed: {message}")]
    Start { message: String },

    #[error("Pipeline run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Unexpected response: {message}")]
    Decode { message: String },

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}

impl PipelineError {
    pub fn credential<S: Into<String>>(message: S) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }

    pub fn start<S: Into<String>>(message: S) -> Self {
        Self::Start {
            message: message.into(),
        }
    }

    pub fn run_not_found<S: Into<String>>(run_id: S) -> Self {
        Self::RunNotFound {
            run_id: run_id.into(),
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Whether repeating the same request may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Start { .. } | Self::Unavailable { .. } | Self::Http { .. }
        )
    }
}

impl From<PipelineError> for RelayError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Credential { .. } => RelayError::misconfigured(message),
            PipelineError::Start { .. } => RelayError::bad_gateway(message),
            PipelineError::RunNotFound { .. } => RelayError::not_found(message),
            PipelineError::Invalid { .. } => RelayError::bad_request(message),
            PipelineError::Decode { .. } => RelayError::bad_gateway(message).retryable(false),
            PipelineError::Unavailable { .. } => RelayError::unavailable(message),
            PipelineError::Http { source } => {
                RelayError::unavailable(message).with_source(source.into())
            }
        }
    }
}
