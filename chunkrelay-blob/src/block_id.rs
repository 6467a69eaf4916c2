use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

use crate::{BlobError, BlobResult};

/// Maps `(identifier, chunk number)` to the block name the store persists.
///
/// The name is the URL-safe base64 of `"<identifier>_<chunk zero-padded>"`.
/// Padding to a fixed digit width keeps every block name of one upload the
/// same length, which block stores that require uniform block ids depend on.
#[derive(Debug, Clone, Copy)]
pub struct BlockIdEncoder {
    digits: u32,
}

impl BlockIdEncoder {
    pub fn new(digits: u32) -> BlobResult<Self> {
        // 10^digits must fit a u32 chunk count
        if digits == 0 || digits > 9 {
            return Err(BlobError::invalid(format!(
                "block digit width must be 1-9, got {digits}"
            )));
        }
        Ok(Self { digits })
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// Largest chunk count the digit width can encode.
    pub fn max_chunks(&self) -> u32 {
        10u32.pow(self.digits) - 1
    }

    pub fn check_total(&self, total_chunks: u32) -> BlobResult<()> {
        if total_chunks == 0 || total_chunks > self.max_chunks() {
            return Err(BlobError::invalid(format!(
                "totalChunks must be 1-{} (got {total_chunks})",
                self.max_chunks()
            )));
        }
        Ok(())
    }

    pub fn encode(&self, identifier: &str, chunk_number: u32) -> BlobResult<String> {
        if chunk_number == 0 || chunk_number > self.max_chunks() {
            return Err(BlobError::invalid(format!(
                "chunkNumber must be 1-{} (got {chunk_number})",
                self.max_chunks()
            )));
        }
        let raw = format!(
            "{identifier}_{chunk_number:0width$}",
            width = self.digits as usize
        );
        Ok(URL_SAFE.encode(raw.as_bytes()))
    }

    /// Reverse of [`encode`](Self::encode): `(identifier, chunk number)`.
    pub fn decode(&self, block_name: &str) -> BlobResult<(String, u32)> {
        let raw = URL_SAFE
            .decode(block_name)
            .map_err(|e| BlobError::invalid(format!("block name is not base64: {e}")))?;
        let raw = String::from_utf8(raw)
            .map_err(|_| BlobError::invalid("block name is not UTF-8"))?;
        let (identifier, number) = raw
            .rsplit_once('_')
            .ok_or_else(|| BlobError::invalid("block name has no chunk suffix"))?;
        if number.len() != self.digits as usize {
            return Err(BlobError::invalid("block name has the wrong digit width"));
        }
        let chunk_number = number
            .parse::<u32>()
            .map_err(|_| BlobError::invalid("block name chunk suffix is not numeric"))?;
        Ok((identifier.to_string(), chunk_number))
    }

    /// Block names for chunks `1..=total_chunks`, in commit order.
    pub fn ordered_names(&self, identifier: &str, total_chunks: u32) -> BlobResult<Vec<String>> {
        self.check_total(total_chunks)?;
        (1..=total_chunks)
            .map(|chunk| self.encode(identifier, chunk))
            .collect()
    }
}

impl Default for BlockIdEncoder {
    fn default() -> Self {
        Self { digits: 8 }
    }
}
