use std::sync::Arc;

use async_trait::async_trait;
use chunkrelay_core::{RunId, UploadIdentifier};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{BlobError, BlobResult, ChunkDigest, ChunkEntry, FinalizePhase, UploadSession};

/// What the caller must do with a chunk it just reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Bytes are new (or a prior attempt never landed): stage them.
    Stage,
    /// Identical bytes are already staged; skip the block store.
    AlreadyStaged,
}

/// Session state after a chunk was recorded or a finalize was requested
#[derive(Debug, Clone)]
pub enum Progress {
    Collecting { received: u32, total: u32 },
    /// The caller won the finalize claim and must run it to completion.
    Claimed(UploadSession),
    /// Another request owns the finalize right now.
    InFlight,
    Finalized { run_id: RunId },
}

/// Storage for upload session state.
///
/// Every method is atomic per identifier. In particular the transition
/// `Collecting -> Finalizing` happens for exactly one caller, which is what
/// makes finalize run once per upload.
#[async_trait]
pub trait UploadSessionStore: Send + Sync {
    /// Record the intent to stage `chunk_number`, creating the session on first contact.
    ///
    /// Fails with `Invalid` when `total_chunks` disagrees with the session and
    /// with `Conflict` when different bytes were already accepted for the chunk.
    async fn reserve_chunk(
        &self,
        identifier: &UploadIdentifier,
        total_chunks: u32,
        chunk_number: u32,
        digest: ChunkDigest,
        now: i64,
    ) -> BlobResult<Reservation>;

    /// Mark a reserved chunk staged and claim finalize if it completed the set.
    async fn mark_staged(
        &self,
        identifier: &UploadIdentifier,
        chunk_number: u32,
        digest: ChunkDigest,
        now: i64,
    ) -> BlobResult<Progress>;

    /// Undo a reservation whose staging failed. No-op unless the entry still
    /// carries `digest` and is unstaged.
    async fn release_chunk(
        &self,
        identifier: &UploadIdentifier,
        chunk_number: u32,
        digest: ChunkDigest,
    ) -> BlobResult<()>;

    /// Forget a chunk entirely, e.g. after its block went missing from the store.
    async fn forget_chunk(&self, identifier: &UploadIdentifier, chunk_number: u32) -> BlobResult<()>;

    /// Try to claim finalize without a new chunk (explicit retry).
    async fn claim_finalize(&self, identifier: &UploadIdentifier, now: i64) -> BlobResult<Progress>;

    /// The object is committed; a later retry only needs to re-run the trigger.
    async fn mark_committed(&self, identifier: &UploadIdentifier, at: i64) -> BlobResult<()>;

    /// `Finalizing -> Finalized`
    async fn finish_finalize(
        &self,
        identifier: &UploadIdentifier,
        run_id: RunId,
        at: i64,
    ) -> BlobResult<()>;

    /// `Finalizing -> Collecting`, keeping staged chunks and the committed marker.
    async fn abandon_finalize(
        &self,
        identifier: &UploadIdentifier,
        reason: String,
        at: i64,
    ) -> BlobResult<()>;

    /// Wait until no finalize is in flight and return the settled phase.
    async fn wait_settled(&self, identifier: &UploadIdentifier) -> BlobResult<FinalizePhase>;

    async fn get(&self, identifier: &UploadIdentifier) -> BlobResult<Option<UploadSession>>;

    /// Housekeeping pass over all sessions.
    ///
    /// Removes `Collecting` sessions idle since before `collecting_before`
    /// unless their object was already committed. `Finalized` sessions
    /// finalized before `finalized_before` are compacted to a tombstone
    /// (chunk bookkeeping dropped, run id kept) and never removed, so an
    /// identifier is not finalized twice. `Finalizing` sessions are skipped.
    async fn sweep_stale(
        &self,
        collecting_before: i64,
        finalized_before: i64,
    ) -> BlobResult<SweepOutcome>;
}

/// What one [`UploadSessionStore::sweep_stale`] pass did
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Abandoned uploads whose staged blocks should be discarded.
    pub removed: Vec<UploadSession>,
    /// Finalized sessions reduced to a tombstone.
    pub compacted: usize,
}

struct SessionSlot {
    session: Mutex<UploadSession>,
    phase: watch::Sender<FinalizePhase>,
}

impl SessionSlot {
    fn new(session: UploadSession) -> Self {
        let (phase, _) = watch::channel(session.phase.clone());
        Self {
            session: Mutex::new(session),
            phase,
        }
    }

    fn set_phase(&self, session: &mut UploadSession, phase: FinalizePhase) {
        session.phase = phase.clone();
        self.phase.send_replace(phase);
    }

    /// Shared tail of `mark_staged` and `claim_finalize`.
    fn advance(&self, session: &mut UploadSession, now: i64) -> Progress {
        if let Some(run_id) = session.run_id() {
            return Progress::Finalized {
                run_id: run_id.clone(),
            };
        }
        if session.phase.is_finalizing() {
            return Progress::InFlight;
        }
        if !session.is_complete() {
            return Progress::Collecting {
                received: session.staged_count(),
                total: session.total_chunks,
            };
        }
        session.updated_at = now;
        self.set_phase(session, FinalizePhase::Finalizing);
        Progress::Claimed(session.clone())
    }
}

/// In-memory session store for single-process deployments and tests.
///
/// Sessions do not survive a restart.
#[derive(Clone, Default)]
pub struct MemoryUploadSessionStore {
    sessions: Arc<DashMap<String, Arc<SessionSlot>>>,
}

impl MemoryUploadSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn slot(&self, identifier: &UploadIdentifier) -> BlobResult<Arc<SessionSlot>> {
        self.sessions
            .get(identifier.as_str())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BlobError::session_not_found(identifier.as_str()))
    }

    fn expect_finalizing(session: &UploadSession) -> BlobResult<()> {
        if !session.phase.is_finalizing() {
            return Err(BlobError::conflict(format!(
                "upload {} is not finalizing",
                session.identifier
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UploadSessionStore for MemoryUploadSessionStore {
    async fn reserve_chunk(
        &self,
        identifier: &UploadIdentifier,
        total_chunks: u32,
        chunk_number: u32,
        digest: ChunkDigest,
        now: i64,
    ) -> BlobResult<Reservation> {
        let slot = Arc::clone(
            self.sessions
                .entry(identifier.as_str().to_string())
                .or_insert_with(|| {
                    Arc::new(SessionSlot::new(UploadSession::new(
                        identifier.clone(),
                        total_chunks,
                        now,
                    )))
                })
                .value(),
        );

        let mut session = slot.session.lock();
        if session.total_chunks != total_chunks {
            return Err(BlobError::invalid(format!(
                "totalChunks {total_chunks} does not match {} from earlier chunks of {identifier}",
                session.total_chunks
            )));
        }

        let existing = session
            .chunks
            .get(&chunk_number)
            .map(|entry| (entry.digest, entry.staged));
        match existing {
            Some((known, _)) if known != digest => Err(BlobError::conflict(format!(
                "chunk {chunk_number} of {identifier} was already received with different content"
            ))),
            Some((_, true)) => Ok(Reservation::AlreadyStaged),
            // Same bytes, earlier attempt still in flight or lost: staging again is harmless.
            Some((_, false)) => Ok(Reservation::Stage),
            // Tombstone of a finalized upload: answer with its run id.
            None if session.run_id().is_some() => Ok(Reservation::AlreadyStaged),
            None if session.phase != FinalizePhase::Collecting => Err(BlobError::conflict(
                format!("upload {identifier} is already finalizing"),
            )),
            None => {
                session.chunks.insert(
                    chunk_number,
                    ChunkEntry {
                        digest,
                        staged: false,
                    },
                );
                session.updated_at = now;
                Ok(Reservation::Stage)
            }
        }
    }

    async fn mark_staged(
        &self,
        identifier: &UploadIdentifier,
        chunk_number: u32,
        digest: ChunkDigest,
        now: i64,
    ) -> BlobResult<Progress> {
        let slot = self.slot(identifier)?;
        let mut session = slot.session.lock();
        let finalized = session.run_id().is_some();

        match session.chunks.get_mut(&chunk_number) {
            Some(entry) if entry.digest == digest => entry.staged = true,
            Some(_) => {
                return Err(BlobError::conflict(format!(
                    "chunk {chunk_number} of {identifier} changed while staging"
                )))
            }
            None if finalized => {}
            None => {
                return Err(BlobError::conflict(format!(
                    "chunk {chunk_number} of {identifier} is not reserved"
                )))
            }
        }
        session.updated_at = now;
        Ok(slot.advance(&mut session, now))
    }

    async fn release_chunk(
        &self,
        identifier: &UploadIdentifier,
        chunk_number: u32,
        digest: ChunkDigest,
    ) -> BlobResult<()> {
        let Ok(slot) = self.slot(identifier) else {
            return Ok(());
        };
        let mut session = slot.session.lock();
        if session
            .chunks
            .get(&chunk_number)
            .is_some_and(|e| e.digest == digest && !e.staged)
        {
            session.chunks.remove(&chunk_number);
        }
        Ok(())
    }

    async fn forget_chunk(&self, identifier: &UploadIdentifier, chunk_number: u32) -> BlobResult<()> {
        let slot = self.slot(identifier)?;
        slot.session.lock().chunks.remove(&chunk_number);
        Ok(())
    }

    async fn claim_finalize(&self, identifier: &UploadIdentifier, now: i64) -> BlobResult<Progress> {
        let slot = self.slot(identifier)?;
        let mut session = slot.session.lock();
        Ok(slot.advance(&mut session, now))
    }

    async fn mark_committed(&self, identifier: &UploadIdentifier, at: i64) -> BlobResult<()> {
        let slot = self.slot(identifier)?;
        let mut session = slot.session.lock();
        Self::expect_finalizing(&session)?;
        session.committed_at = Some(at);
        session.updated_at = at;
        Ok(())
    }

    async fn finish_finalize(
        &self,
        identifier: &UploadIdentifier,
        run_id: RunId,
        at: i64,
    ) -> BlobResult<()> {
        let slot = self.slot(identifier)?;
        let mut session = slot.session.lock();
        Self::expect_finalizing(&session)?;
        session.last_error = None;
        session.updated_at = at;
        slot.set_phase(
            &mut session,
            FinalizePhase::Finalized {
                run_id,
                finalized_at: at,
            },
        );
        Ok(())
    }

    async fn abandon_finalize(
        &self,
        identifier: &UploadIdentifier,
        reason: String,
        at: i64,
    ) -> BlobResult<()> {
        let slot = self.slot(identifier)?;
        let mut session = slot.session.lock();
        Self::expect_finalizing(&session)?;
        session.last_error = Some(reason);
        session.updated_at = at;
        slot.set_phase(&mut session, FinalizePhase::Collecting);
        Ok(())
    }

    async fn wait_settled(&self, identifier: &UploadIdentifier) -> BlobResult<FinalizePhase> {
        let mut phase = self.slot(identifier)?.phase.subscribe();
        let settled = phase
            .wait_for(|p| !p.is_finalizing())
            .await
            .map(|p| p.clone());
        settled.map_err(|_| BlobError::session_not_found(identifier.as_str()))
    }

    async fn get(&self, identifier: &UploadIdentifier) -> BlobResult<Option<UploadSession>> {
        Ok(self
            .sessions
            .get(identifier.as_str())
            .map(|entry| entry.value().session.lock().clone()))
    }

    async fn sweep_stale(
        &self,
        collecting_before: i64,
        finalized_before: i64,
    ) -> BlobResult<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        self.sessions.retain(|_, slot| {
            let mut session = slot.session.lock();
            let finalized_at = match &session.phase {
                FinalizePhase::Collecting => None,
                FinalizePhase::Finalizing => return true,
                FinalizePhase::Finalized { finalized_at, .. } => Some(*finalized_at),
            };

            match finalized_at {
                Some(at) => {
                    if at < finalized_before && !session.chunks.is_empty() {
                        session.chunks.clear();
                        session.last_error = None;
                        outcome.compacted += 1;
                    }
                    true
                }
                None => {
                    let stale = session.updated_at < collecting_before
                        && session.committed_at.is_none();
                    if stale {
                        outcome.removed.push(session.clone());
                    }
                    !stale
                }
            }
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> UploadIdentifier {
        UploadIdentifier::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn only_one_caller_claims_finalize() {
        let store = MemoryUploadSessionStore::new();
        let upload = id("claim-once");
        let digest = ChunkDigest::compute(b"a");

        store.reserve_chunk(&upload, 1, 1, digest, 0).await.unwrap();
        let first = store.mark_staged(&upload, 1, digest, 1).await.unwrap();
        let second = store.mark_staged(&upload, 1, digest, 2).await.unwrap();

        assert!(matches!(first, Progress::Claimed(_)));
        assert!(matches!(second, Progress::InFlight));
    }

    #[tokio::test]
    async fn different_bytes_for_a_known_chunk_conflict() {
        let store = MemoryUploadSessionStore::new();
        let upload = id("conflict");

        store
            .reserve_chunk(&upload, 2, 1, ChunkDigest::compute(b"a"), 0)
            .await
            .unwrap();
        let err = store
            .reserve_chunk(&upload, 2, 1, ChunkDigest::compute(b"b"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Conflict { .. }));

        let err = store
            .reserve_chunk(&upload, 3, 2, ChunkDigest::compute(b"c"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Invalid { .. }));
    }

    #[tokio::test]
    async fn abandoned_finalize_can_be_claimed_again() {
        let store = MemoryUploadSessionStore::new();
        let upload = id("retry");
        let digest = ChunkDigest::compute(b"x");

        store.reserve_chunk(&upload, 1, 1, digest, 0).await.unwrap();
        store.mark_staged(&upload, 1, digest, 0).await.unwrap();
        store
            .abandon_finalize(&upload, "store down".to_string(), 1)
            .await
            .unwrap();

        let session = store.get(&upload).await.unwrap().unwrap();
        assert_eq!(session.phase, FinalizePhase::Collecting);
        assert_eq!(session.last_error.as_deref(), Some("store down"));
        assert!(matches!(
            store.claim_finalize(&upload, 2).await.unwrap(),
            Progress::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn waiters_see_the_settled_phase() {
        let store = MemoryUploadSessionStore::new();
        let upload = id("waiter");
        let digest = ChunkDigest::compute(b"x");

        store.reserve_chunk(&upload, 1, 1, digest, 0).await.unwrap();
        store.mark_staged(&upload, 1, digest, 0).await.unwrap();

        let waiter = {
            let store = store.clone();
            let upload = upload.clone();
            tokio::spawn(async move { store.wait_settled(&upload).await })
        };
        tokio::task::yield_now().await;
        store
            .finish_finalize(&upload, RunId::from_string("run-1".into()), 5)
            .await
            .unwrap();

        let phase = waiter.await.unwrap().unwrap();
        assert_eq!(
            phase,
            FinalizePhase::Finalized {
                run_id: RunId::from_string("run-1".into()),
                finalized_at: 5,
            }
        );
    }

    #[tokio::test]
    async fn sweep_skips_sessions_mid_finalize() {
        let store = MemoryUploadSessionStore::new();
        let digest = ChunkDigest::compute(b"x");

        let idle = id("idle");
        store.reserve_chunk(&idle, 2, 1, digest, 0).await.unwrap();

        let busy = id("busy");
        store.reserve_chunk(&busy, 1, 1, digest, 0).await.unwrap();
        store.mark_staged(&busy, 1, digest, 0).await.unwrap();

        let outcome = store.sweep_stale(100, 100).await.unwrap();
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].identifier, idle);
        assert!(store.get(&busy).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn finalized_sessions_become_tombstones() {
        let store = MemoryUploadSessionStore::new();
        let upload = id("done");
        let digest = ChunkDigest::compute(b"x");
        let run_id = RunId::from_string("run-1".into());

        store.reserve_chunk(&upload, 1, 1, digest, 0).await.unwrap();
        store.mark_staged(&upload, 1, digest, 0).await.unwrap();
        store.mark_committed(&upload, 1).await.unwrap();
        store.finish_finalize(&upload, run_id.clone(), 1).await.unwrap();

        let outcome = store.sweep_stale(100, 100).await.unwrap();
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.compacted, 1);

        let session = store.get(&upload).await.unwrap().unwrap();
        assert!(session.chunks.is_empty());
        assert_eq!(session.run_id(), Some(&run_id));

        // A late re-send lands on the tombstone, not on a fresh session
        assert_eq!(
            store.reserve_chunk(&upload, 1, 1, digest, 200).await.unwrap(),
            Reservation::AlreadyStaged
        );
        assert!(matches!(
            store.mark_staged(&upload, 1, digest, 200).await.unwrap(),
            Progress::Finalized { run_id: r } if r == run_id
        ));
    }

    #[tokio::test]
    async fn committed_uploads_are_never_swept() {
        let store = MemoryUploadSessionStore::new();
        let upload = id("committed");
        let digest = ChunkDigest::compute(b"x");

        store.reserve_chunk(&upload, 1, 1, digest, 0).await.unwrap();
        store.mark_staged(&upload, 1, digest, 0).await.unwrap();
        store.mark_committed(&upload, 1).await.unwrap();
        store
            .abandon_finalize(&upload, "engine down".to_string(), 1)
            .await
            .unwrap();

        let outcome = store.sweep_stale(100, 100).await.unwrap();
        assert!(outcome.removed.is_empty());
        assert!(store.get(&upload).await.unwrap().is_some());
    }
}
