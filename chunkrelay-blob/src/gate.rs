use std::sync::Arc;

use chunkrelay_core::{PipelineLauncher, RunId, UploadIdentifier};

use crate::{
    BlobCommitter, BlobConfig, BlobError, BlobResult, BlockStore, ChunkDigest, ChunkOutcome,
    ChunkProbe, ChunkStager, ChunkUpload, FinalizePhase, Progress, Reservation, UploadSession,
    UploadSessionStore,
};

/// Decides, exactly once per upload, when every chunk is staged and runs
/// commit + pipeline trigger for that upload.
///
/// The claim itself is the session store's atomic `Collecting -> Finalizing`
/// transition. The claiming request runs the finalize on a spawned task so a
/// client hanging up mid-commit cannot strand the session in `Finalizing`.
#[derive(Clone)]
pub struct FinalizeGate {
    sessions: Arc<dyn UploadSessionStore>,
    stager: ChunkStager,
    committer: BlobCommitter,
    launcher: Arc<dyn PipelineLauncher>,
    config: BlobConfig,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl FinalizeGate {
    pub fn new(
        store: Arc<dyn BlockStore>,
        sessions: Arc<dyn UploadSessionStore>,
        launcher: Arc<dyn PipelineLauncher>,
        config: BlobConfig,
    ) -> BlobResult<Self> {
        let stager = ChunkStager::new(Arc::clone(&store), &config.upload_rules)?;
        let committer = BlobCommitter::new(store, *stager.encoder(), config.content.clone());
        Ok(Self {
            sessions,
            stager,
            committer,
            launcher,
            config,
        })
    }

    pub fn stager(&self) -> &ChunkStager {
        &self.stager
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    /// Stage one chunk and, if it completes the upload, finalize.
    ///
    /// Re-sends of identical bytes are absorbed. Once the upload is finalized
    /// every re-send answers with the stored run id and touches no store.
    pub async fn accept_chunk(&self, chunk: ChunkUpload) -> BlobResult<ChunkOutcome> {
        self.stager.validate(&chunk)?;

        let identifier = chunk.identifier.clone();
        self.refuse_committed(&identifier).await?;
        let digest = ChunkDigest::compute(&chunk.data);
        let reservation = self
            .sessions
            .reserve_chunk(
                &identifier,
                chunk.total_chunks,
                chunk.chunk_number,
                digest,
                now(),
            )
            .await?;

        if reservation == Reservation::Stage {
            if let Err(err) = self.stager.stage(&chunk).await {
                self.release(&identifier, chunk.chunk_number, digest).await;
                return Err(err);
            }
        } else {
            tracing::debug!(
                identifier = %identifier,
                chunk = chunk.chunk_number,
                "duplicate chunk absorbed"
            );
        }

        let progress = self
            .sessions
            .mark_staged(&identifier, chunk.chunk_number, digest, now())
            .await?;
        self.settle(&identifier, progress).await
    }

    /// Whether `chunk_number` is already held for this upload. Never stages.
    pub async fn probe(
        &self,
        identifier: &UploadIdentifier,
        chunk_number: u32,
        total_chunks: u32,
    ) -> BlobResult<ChunkProbe> {
        self.stager.check_position(chunk_number, total_chunks)?;

        match self.sessions.get(identifier).await? {
            Some(session) if session.run_id().is_some() => Ok(ChunkProbe::Present),
            Some(session) if session.is_staged(chunk_number) => Ok(ChunkProbe::Present),
            Some(_) => Ok(ChunkProbe::Absent),
            None => self.stager.probe(identifier, chunk_number).await,
        }
    }

    /// Re-attempt finalize for an upload whose chunks are all staged.
    pub async fn retry(&self, identifier: &UploadIdentifier) -> BlobResult<RunId> {
        let progress = self.sessions.claim_finalize(identifier, now()).await?;
        match self.settle(identifier, progress).await? {
            ChunkOutcome::Finalized { run_id } => Ok(run_id),
            ChunkOutcome::Progress {
                chunks_received,
                total_chunks,
            } => Err(BlobError::conflict(format!(
                "upload {identifier} is incomplete: {chunks_received} of {total_chunks} chunks staged"
            ))),
        }
    }

    pub async fn session(&self, identifier: &UploadIdentifier) -> BlobResult<UploadSession> {
        self.sessions
            .get(identifier)
            .await?
            .ok_or_else(|| BlobError::session_not_found(identifier.as_str()))
    }

    pub async fn health(&self) -> BlobResult<()> {
        self.stager.store().health().await
    }

    /// Drop idle uncommitted sessions with their staged blocks and compact
    /// finalized sessions past their retention. Returns how many were removed.
    pub async fn sweep_abandoned(&self) -> BlobResult<usize> {
        let now = now();
        let outcome = self
            .sessions
            .sweep_stale(
                now - self.config.session_ttl.as_secs() as i64,
                now - self.config.finalized_retention.as_secs() as i64,
            )
            .await?;

        for session in &outcome.removed {
            let chunks = session.chunks.keys().copied();
            if let Err(err) = self.committer.discard(&session.identifier, chunks).await {
                tracing::warn!(
                    identifier = %session.identifier,
                    error = %err,
                    "failed to discard blocks of abandoned upload"
                );
            }
        }

        if !outcome.removed.is_empty() || outcome.compacted > 0 {
            tracing::info!(
                removed = outcome.removed.len(),
                compacted = outcome.compacted,
                "swept upload sessions"
            );
        }
        Ok(outcome.removed.len())
    }

    /// An identifier with no session but an existing object was finalized
    /// before this process knew about it (restart, lost session state).
    async fn refuse_committed(&self, identifier: &UploadIdentifier) -> BlobResult<()> {
        if self.sessions.get(identifier).await?.is_some() {
            return Ok(());
        }
        if self.stager.store().object_exists(identifier.as_str()).await? {
            return Err(BlobError::already_committed(identifier.as_str()));
        }
        Ok(())
    }

    async fn settle(
        &self,
        identifier: &UploadIdentifier,
        progress: Progress,
    ) -> BlobResult<ChunkOutcome> {
        let run_id = match progress {
            Progress::Collecting { received, total } => {
                return Ok(ChunkOutcome::Progress {
                    chunks_received: received,
                    total_chunks: total,
                })
            }
            Progress::Finalized { run_id } => run_id,
            Progress::Claimed(session) => {
                let gate = self.clone();
                tokio::spawn(async move { gate.finalize(session).await })
                    .await
                    .map_err(BlobError::backend)??
            }
            Progress::InFlight => self.await_in_flight(identifier).await?,
        };
        Ok(ChunkOutcome::Finalized { run_id })
    }

    async fn await_in_flight(&self, identifier: &UploadIdentifier) -> BlobResult<RunId> {
        match self.sessions.wait_settled(identifier).await? {
            FinalizePhase::Finalized { run_id, .. } => Ok(run_id),
            _ => {
                let reason = self
                    .sessions
                    .get(identifier)
                    .await?
                    .and_then(|s| s.last_error)
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(BlobError::conflict(format!(
                    "concurrent finalize of {identifier} failed: {reason}"
                )))
            }
        }
    }

    async fn finalize(&self, session: UploadSession) -> BlobResult<RunId> {
        let identifier = session.identifier.clone();
        tracing::info!(
            identifier = %identifier,
            total_chunks = session.total_chunks,
            committed = session.committed_at.is_some(),
            "finalize claimed"
        );

        match self.commit_and_trigger(&session).await {
            Ok(run_id) => {
                tracing::info!(identifier = %identifier, run_id = %run_id, "upload finalized");
                Ok(run_id)
            }
            Err(err) => {
                tracing::warn!(
                    identifier = %identifier,
                    error = %err,
                    retryable = err.is_retryable(),
                    "finalize failed, session back to collecting"
                );
                if let Err(abandon) = self
                    .sessions
                    .abandon_finalize(&identifier, err.to_string(), now())
                    .await
                {
                    tracing::error!(
                        identifier = %identifier,
                        error = %abandon,
                        "could not release finalize claim"
                    );
                }
                Err(err)
            }
        }
    }

    async fn commit_and_trigger(&self, session: &UploadSession) -> BlobResult<RunId> {
        let identifier = &session.identifier;

        if session.committed_at.is_none() {
            if let Err(err) = self.committer.commit(identifier, session.total_chunks).await {
                if let BlobError::BlockNotFound { name } = &err {
                    self.forget_missing_block(identifier, name).await;
                }
                return Err(err);
            }
            self.sessions.mark_committed(identifier, now()).await?;
        }

        let run_id = self
            .launcher
            .launch(identifier)
            .await
            .map_err(BlobError::handoff)?;
        self.sessions
            .finish_finalize(identifier, run_id.clone(), now())
            .await?;
        Ok(run_id)
    }

    /// A block the store lost must be re-sent, so its chunk leaves the session.
    async fn forget_missing_block(&self, identifier: &UploadIdentifier, block_name: &str) {
        let chunk_number = match self.stager.encoder().decode(block_name) {
            Ok((_, chunk_number)) => chunk_number,
            Err(err) => {
                tracing::warn!(identifier = %identifier, block = block_name, error = %err, "undecodable block name");
                return;
            }
        };
        if let Err(err) = self.sessions.forget_chunk(identifier, chunk_number).await {
            tracing::warn!(identifier = %identifier, chunk = chunk_number, error = %err, "failed to forget missing chunk");
        }
    }

    async fn release(&self, identifier: &UploadIdentifier, chunk_number: u32, digest: ChunkDigest) {
        if let Err(err) = self
            .sessions
            .release_chunk(identifier, chunk_number, digest)
            .await
        {
            tracing::warn!(
                identifier = %identifier,
                chunk = chunk_number,
                error = %err,
                "failed to release chunk reservation"
            );
        }
    }
}
