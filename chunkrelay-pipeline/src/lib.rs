//! # chunkrelay-pipeline
//!
//! Everything after the upload is committed: starting the ingestion workflow
//! with a service credential, reporting the run's status, and paging through
//! the records it accepted and rejected.
//!
//! External systems sit behind [`TokenProvider`], [`WorkflowEngine`] and
//! [`ResultStore`]. HTTP and OAuth2 implementations are provided for
//! deployments, in-memory ones for development and tests.

mod engine;
mod error;
mod memory;
mod results;
mod status;
mod token;
mod trigger;

pub use engine::{HttpEngineConfig, HttpWorkflowEngine, RunStatus, WorkflowEngine};
pub use error::{PipelineError, PipelineResult};
pub use memory::{MemoryResultStore, MemoryRun, MemoryWorkflowEngine, RecordedQuery};
pub use results::{
    HttpResultConfig, HttpResultStore, PageRequest, ResultCollection, ResultFetcher, ResultPage,
    ResultStore, DEFAULT_MAX_ITEMS_PER_PAGE,
};
pub use status::StatusPoller;
pub use token::{
    AccessToken, ClientCredentialsConfig, ClientCredentialsTokenProvider, StaticTokenProvider,
    TokenProvider,
};
pub use trigger::PipelineTrigger;
