use chunkrelay_blob::FinalizeGate;
use chunkrelay_pipeline::{ResultFetcher, StatusPoller};

/// Everything the upload routes need, cheap to clone per request
#[derive(Clone)]
pub struct RelayState {
    pub gate: FinalizeGate,
    pub status: StatusPoller,
    pub results: ResultFetcher,
}

impl RelayState {
    pub fn new(gate: FinalizeGate, status: StatusPoller, results: ResultFetcher) -> Self {
        Self {
            gate,
            status,
            results,
        }
    }

    pub fn max_chunk_bytes(&self) -> u64 {
        self.gate.config().upload_rules.max_chunk_bytes
    }
}
