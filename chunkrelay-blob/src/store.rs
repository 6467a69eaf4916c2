use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{BlobResult, StagedBlock};

/// Block storage primitives - must be implemented by all storage backends.
///
/// Blocks are staged under an object key and stay invisible until
/// [`commit_blocks`](BlockStore::commit_blocks) assembles them, in the given
/// order, into the object itself.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Stage one named block for `object_key`. Staging an existing name replaces it.
    async fn stage_block(
        &self,
        object_key: &str,
        block_name: &str,
        data: Bytes,
    ) -> BlobResult<StagedBlock>;

    /// Whether `block_name` is known for `object_key`, staged or already committed.
    async fn block_exists(&self, object_key: &str, block_name: &str) -> BlobResult<bool>;

    /// Whether an object was already committed at `object_key`.
    async fn object_exists(&self, object_key: &str) -> BlobResult<bool>;

    /// Assemble `block_names` in order into the object at `object_key`.
    async fn commit_blocks(
        &self,
        object_key: &str,
        block_names: &[String],
        content: &ContentSettings,
    ) -> BlobResult<CommitResult>;

    /// Drop staged blocks that will never be committed. Missing names are ignored.
    async fn discard_blocks(&self, object_key: &str, block_names: &[String]) -> BlobResult<()>;

    /// Cheap reachability check of the backing store
    async fn health(&self) -> BlobResult<()>;
}

/// Content metadata for a committed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSettings {
    pub content_type: String,
    pub content_encoding: String,
}

impl ContentSettings {
    pub fn new(content_type: impl Into<String>, content_encoding: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
        }
    }

    /// `text/csv`, `utf-8`: what the ingestion workflow reads.
    pub fn csv_utf8() -> Self {
        Self::new("text/csv", "utf-8")
    }
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self::csv_utf8()
    }
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub object_key: String,
    pub size_bytes: u64,
    pub block_count: u32,
    pub etag: Option<String>,
}
