use std::sync::Arc;

use chunkrelay_core::UploadIdentifier;

use crate::{BlobResult, BlockIdEncoder, BlockStore, CommitResult, ContentSettings};

/// Assembles the staged blocks of a complete upload into one object keyed by
/// the upload identifier.
#[derive(Clone)]
pub struct BlobCommitter {
    store: Arc<dyn BlockStore>,
    encoder: BlockIdEncoder,
    content: ContentSettings,
}

impl BlobCommitter {
    pub fn new(store: Arc<dyn BlockStore>, encoder: BlockIdEncoder, content: ContentSettings) -> Self {
        Self {
            store,
            encoder,
            content,
        }
    }

    pub async fn commit(
        &self,
        identifier: &UploadIdentifier,
        total_chunks: u32,
    ) -> BlobResult<CommitResult> {
        let block_names = self.encoder.ordered_names(identifier.as_str(), total_chunks)?;
        let result = self
            .store
            .commit_blocks(identifier.as_str(), &block_names, &self.content)
            .await?;

        tracing::info!(
            identifier = %identifier,
            blocks = result.block_count,
            size_bytes = result.size_bytes,
            content_type = %self.content.content_type,
            "object committed"
        );
        Ok(result)
    }

    /// Drop the staged blocks of an upload that will never be committed.
    pub async fn discard(
        &self,
        identifier: &UploadIdentifier,
        chunk_numbers: impl IntoIterator<Item = u32>,
    ) -> BlobResult<()> {
        let block_names = chunk_numbers
            .into_iter()
            .map(|chunk| self.encoder.encode(identifier.as_str(), chunk))
            .collect::<BlobResult<Vec<_>>>()?;
        if block_names.is_empty() {
            return Ok(());
        }
        self.store
            .discard_blocks(identifier.as_str(), &block_names)
            .await
    }
}
