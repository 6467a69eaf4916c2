use std::collections::BTreeMap;

use bytes::Bytes;
use chunkrelay_core::{RunId, UploadIdentifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 of one chunk's bytes, used to tell a harmless re-send from a
/// conflicting one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkDigest([u8; 32]);

impl ChunkDigest {
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for ChunkDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkDigest({})", &self.to_hex()[..16])
    }
}

/// One chunk as received from a client
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub identifier: UploadIdentifier,
    /// 1-based
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub data: Bytes,
}

impl ChunkUpload {
    pub fn new(
        identifier: UploadIdentifier,
        chunk_number: u32,
        total_chunks: u32,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            identifier,
            chunk_number,
            total_chunks,
            data: data.into(),
        }
    }
}

/// Where an upload session is in its finalize lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizePhase {
    Collecting,
    Finalizing,
    Finalized { run_id: RunId, finalized_at: i64 },
}

impl FinalizePhase {
    pub fn is_finalizing(&self) -> bool {
        matches!(self, FinalizePhase::Finalizing)
    }
}

/// Per-chunk bookkeeping. `staged` flips once the block store accepted the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub digest: ChunkDigest,
    pub staged: bool,
}

/// Upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub identifier: UploadIdentifier,
    pub total_chunks: u32,
    pub chunks: BTreeMap<u32, ChunkEntry>,
    pub phase: FinalizePhase,

    /// Set once the object has been committed; a retry then only re-runs the trigger.
    pub committed_at: Option<i64>,
    pub last_error: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl UploadSession {
    pub fn new(identifier: UploadIdentifier, total_chunks: u32, now: i64) -> Self {
        Self {
            identifier,
            total_chunks,
            chunks: BTreeMap::new(),
            phase: FinalizePhase::Collecting,
            committed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn staged_count(&self) -> u32 {
        self.chunks.values().filter(|c| c.staged).count() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.staged_count() == self.total_chunks
    }

    pub fn is_staged(&self, chunk_number: u32) -> bool {
        self.chunks.get(&chunk_number).is_some_and(|c| c.staged)
    }

    pub fn run_id(&self) -> Option<&RunId> {
        match &self.phase {
            FinalizePhase::Finalized { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}

/// Answer to a resumable client's "do you already have this chunk?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProbe {
    Present,
    Absent,
}

/// A block accepted by the block store
#[derive(Debug, Clone)]
pub struct StagedBlock {
    pub name: String,
    pub size_bytes: u64,
}

/// What the client learns after sending one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk staged, upload still collecting
    Progress {
        chunks_received: u32,
        total_chunks: u32,
    },
    /// All chunks present, object committed and the pipeline started
    Finalized { run_id: RunId },
}
