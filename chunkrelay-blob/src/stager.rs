use std::sync::Arc;

use chunkrelay_core::UploadIdentifier;

use crate::{
    BlobError, BlobResult, BlockIdEncoder, BlockStore, ChunkProbe, ChunkUpload, StagedBlock,
    UploadRules,
};

/// Writes single chunks to the block store under their encoded block names.
///
/// The stager knows nothing about sessions; deduplication and completion
/// tracking live in [`FinalizeGate`](crate::FinalizeGate).
#[derive(Clone)]
pub struct ChunkStager {
    store: Arc<dyn BlockStore>,
    encoder: BlockIdEncoder,
    max_chunk_bytes: u64,
}

impl ChunkStager {
    pub fn new(store: Arc<dyn BlockStore>, rules: &UploadRules) -> BlobResult<Self> {
        Ok(Self {
            store,
            encoder: BlockIdEncoder::new(rules.block_digits)?,
            max_chunk_bytes: rules.max_chunk_bytes,
        })
    }

    pub fn encoder(&self) -> &BlockIdEncoder {
        &self.encoder
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Check chunk numbering and body size before anything is recorded.
    pub fn validate(&self, chunk: &ChunkUpload) -> BlobResult<()> {
        self.check_position(chunk.chunk_number, chunk.total_chunks)?;

        if chunk.data.is_empty() {
            return Err(BlobError::invalid("chunk body is empty"));
        }
        if chunk.data.len() as u64 > self.max_chunk_bytes {
            return Err(BlobError::invalid(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                chunk.data.len(),
                self.max_chunk_bytes
            )));
        }
        Ok(())
    }

    pub fn check_position(&self, chunk_number: u32, total_chunks: u32) -> BlobResult<()> {
        self.encoder.check_total(total_chunks)?;
        if chunk_number == 0 || chunk_number > total_chunks {
            return Err(BlobError::invalid(format!(
                "chunkNumber must be 1-{total_chunks} (got {chunk_number})"
            )));
        }
        Ok(())
    }

    pub async fn stage(&self, chunk: &ChunkUpload) -> BlobResult<StagedBlock> {
        let object_key = chunk.identifier.as_str();
        let block_name = self.encoder.encode(object_key, chunk.chunk_number)?;

        let staged = self
            .store
            .stage_block(object_key, &block_name, chunk.data.clone())
            .await?;

        tracing::debug!(
            identifier = object_key,
            chunk = chunk.chunk_number,
            block = %staged.name,
            size_bytes = staged.size_bytes,
            "chunk staged"
        );
        Ok(staged)
    }

    /// Read-only existence check against the block store.
    pub async fn probe(
        &self,
        identifier: &UploadIdentifier,
        chunk_number: u32,
    ) -> BlobResult<ChunkProbe> {
        let block_name = self.encoder.encode(identifier.as_str(), chunk_number)?;
        let exists = self
            .store
            .block_exists(identifier.as_str(), &block_name)
            .await?;
        Ok(if exists {
            ChunkProbe::Present
        } else {
            ChunkProbe::Absent
        })
    }
}
