//! # chunkrelay-blob: chunked uploads committed exactly once
//!
//! `chunkrelay-blob` receives the chunks of a resumable upload in any order,
//! stages each one as a named block, and, once every chunk is present,
//! commits the blocks as a single `text/csv` object and hands the upload off
//! to the downstream pipeline. Duplicate and concurrent "final chunk"
//! requests are absorbed: one commit, one pipeline run, one run id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chunkrelay_blob::prelude::*;
//! use chunkrelay_core::{PipelineLauncher, UploadIdentifier};
//!
//! # async fn run(launcher: Arc<dyn PipelineLauncher>) -> BlobResult<()> {
//! let gate = FinalizeGate::new(
//!     Arc::new(MemoryBlockStore::new()),
//!     Arc::new(MemoryUploadSessionStore::new()),
//!     launcher,
//!     BlobConfig::default(),
//! )?;
//!
//! let id = UploadIdentifier::parse("abc123").expect("valid identifier");
//! let outcome = gate
//!     .accept_chunk(ChunkUpload::new(id, 1, 1, &b"a,b\n1,2\n"[..]))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────┐
//! │         FinalizeGate          │  ← session phases, exactly-once finalize
//! ├───────────────┬───────────────┤
//! │  ChunkStager  │ BlobCommitter │  ← block naming, staging, ordered commit
//! ├───────────────┴───────────────┤
//! │          BlockStore           │  ← storage primitives (memory, S3)
//! └───────────────────────────────┘
//! ```
//!
//! Session state sits behind [`UploadSessionStore`]; the hand-off to the
//! pipeline is the [`PipelineLauncher`](chunkrelay_core::PipelineLauncher)
//! trait from `chunkrelay-core`.

mod block_id;
mod committer;
mod config;
mod error;
mod gate;
mod memory_store;
mod s3_store;
mod session_store;
mod stager;
pub mod store;
mod types;

pub use block_id::BlockIdEncoder;
pub use committer::BlobCommitter;
pub use config::{BlobConfig, UploadRules};
pub use error::{BlobError, BlobResult};
pub use gate::FinalizeGate;
pub use memory_store::{MemoryBlockStore, MemoryObject};
pub use s3_store::{S3BlockStore, S3Config};
pub use session_store::{
    MemoryUploadSessionStore, Progress, Reservation, SweepOutcome, UploadSessionStore,
};
pub use stager::ChunkStager;
pub use store::{BlockStore, CommitResult, ContentSettings};
pub use types::{
    ChunkDigest, ChunkEntry, ChunkOutcome, ChunkProbe, ChunkUpload, FinalizePhase, StagedBlock,
    UploadSession,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobConfig, BlobError, BlobResult, BlockStore, ChunkOutcome, ChunkProbe, ChunkUpload,
        FinalizeGate, MemoryBlockStore, MemoryUploadSessionStore, UploadRules,
    };
}
