use chunkrelay_core::{ErrorKind, RelayError};
use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur while staging, finalizing or committing an upload
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Block not found: {name}")]
    BlockNotFound { name: String },

    #[error("Upload {identifier} was already committed")]
    AlreadyCommitted { identifier: String },

    #[error("Upload session not found: {identifier}")]
    SessionNotFound { identifier: String },

    #[error("Block store rejected credentials: {message}")]
    Unauthorized { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Pipeline hand-off failed: {source}")]
    Handoff {
        #[source]
        source: RelayError,
    },
}

impl BlobError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn block_not_found<S: Into<String>>(name: S) -> Self {
        Self::BlockNotFound { name: name.into() }
    }

    pub fn already_committed<S: Into<String>>(identifier: S) -> Self {
        Self::AlreadyCommitted {
            identifier: identifier.into(),
        }
    }

    pub fn session_not_found<S: Into<String>>(identifier: S) -> Self {
        Self::SessionNotFound {
            identifier: identifier.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn handoff(source: RelayError) -> Self {
        Self::Handoff { source }
    }

    /// Whether repeating the same request may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { .. } | Self::Io { .. } | Self::Conflict { .. } => true,
            Self::BlockNotFound { .. } => true,
            Self::Handoff { source } => source.retryable,
            _ => false,
        }
    }
}

impl From<BlobError> for RelayError {
    fn from(err: BlobError) -> Self {
        let message = err.to_string();
        match err {
            BlobError::Invalid { .. } => RelayError::bad_request(message),
            BlobError::Conflict { .. } => RelayError::conflict(message),
            BlobError::SessionNotFound { .. } => RelayError::not_found(message),
            BlobError::AlreadyCommitted { .. } => RelayError::conflict(message).retryable(false),
            // A block that vanished between staging and commit: the client can re-send it.
            BlobError::BlockNotFound { .. } => RelayError::conflict(message),
            BlobError::Unauthorized { .. } => RelayError::misconfigured(message),
            BlobError::Handoff { source } => source,
            BlobError::Serialization { source } => {
                RelayError::new(ErrorKind::GeneralError, message).with_source(source.into())
            }
            BlobError::Backend { .. } | BlobError::Io { .. } => RelayError::unavailable(message),
        }
    }
}
