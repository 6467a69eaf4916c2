use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chunkrelay_core::RunId;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    AccessToken, PipelineError, PipelineResult, ResultCollection, ResultStore, RunStatus,
    WorkflowEngine,
};

/// A run recorded by [`MemoryWorkflowEngine`]
#[derive(Debug, Clone)]
pub struct MemoryRun {
    pub pipeline: String,
    pub parameters: Value,
    pub status: RunStatus,
}

/// In-memory workflow engine for development and tests.
///
/// Runs start `Queued` and stay there until [`set_status`](Self::set_status)
/// moves them.
#[derive(Clone, Default)]
pub struct MemoryWorkflowEngine {
    runs: Arc<RwLock<HashMap<String, MemoryRun>>>,
    starts: Arc<AtomicUsize>,
    fail_starts: Arc<AtomicUsize>,
    reject_credentials: Arc<AtomicBool>,
}

impl MemoryWorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start attempts, including failed ones
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn fail_next_starts(&self, count: usize) {
        self.fail_starts.store(count, Ordering::SeqCst);
    }

    pub fn set_reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    pub fn set_status(&self, run_id: &RunId, status: RunStatus) -> PipelineResult<()> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| PipelineError::run_not_found(run_id.as_str()))?;
        run.status = status;
        Ok(())
    }

    pub fn run(&self, run_id: &RunId) -> Option<MemoryRun> {
        self.runs.read().get(run_id.as_str()).cloned()
    }

    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    fn check_credentials(&self) -> PipelineResult<()> {
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(PipelineError::credential("memory engine rejects every token"));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowEngine for MemoryWorkflowEngine {
    async fn start_run(
        &self,
        _token: &AccessToken,
        pipeline: &str,
        parameters: &Value,
    ) -> PipelineResult<RunId> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.check_credentials()?;

        if self
            .fail_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::start("injected start failure"));
        }

        let run_id = Uuid::new_v4().to_string();
        self.runs.write().insert(
            run_id.clone(),
            MemoryRun {
                pipeline: pipeline.to_string(),
                parameters: parameters.clone(),
                status: RunStatus::Queued,
            },
        );
        Ok(RunId::from_string(run_id))
    }

    async fn run_status(&self, _token: &AccessToken, run_id: &RunId) -> PipelineResult<RunStatus> {
        self.check_credentials()?;
        self.runs
            .read()
            .get(run_id.as_str())
            .map(|run| run.status.clone())
            .ok_or_else(|| PipelineError::run_not_found(run_id.as_str()))
    }
}

/// A bounded query seen by [`MemoryResultStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub run_id: String,
    pub collection: ResultCollection,
    pub offset: u64,
    pub limit: u32,
}

/// In-memory result store. Unknown runs read as empty.
#[derive(Clone, Default)]
pub struct MemoryResultStore {
    records: Arc<RwLock<HashMap<(String, ResultCollection), Vec<Value>>>>,
    queries: Arc<RwLock<Vec<RecordedQuery>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run_id: &RunId, collection: ResultCollection, records: Vec<Value>) {
        self.records
            .write()
            .insert((run_id.as_str().to_string(), collection), records);
    }

    /// Every query issued so far, in order
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.read().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn query(
        &self,
        _token: &AccessToken,
        run_id: &RunId,
        collection: ResultCollection,
        offset: u64,
        limit: u32,
    ) -> PipelineResult<Vec<Value>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PipelineError::unavailable("memory result store marked unavailable"));
        }
        self.queries.write().push(RecordedQuery {
            run_id: run_id.as_str().to_string(),
            collection,
            offset,
            limit,
        });

        let records = self.records.read();
        let page = records
            .get(&(run_id.as_str().to_string(), collection))
            .map(|all| {
                all.iter()
                    .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(page)
    }
}
