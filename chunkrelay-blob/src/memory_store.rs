use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::{BlobError, BlobResult, BlockStore, CommitResult, ContentSettings, StagedBlock};

/// An object assembled by [`MemoryBlockStore::commit_blocks`]
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub content: ContentSettings,
    pub block_names: Vec<String>,
}

#[derive(Debug, Default)]
struct ObjectBlocks {
    staged: HashMap<String, Bytes>,
    committed: Option<MemoryObject>,
}

/// In-memory block store for development and tests.
///
/// Counts every call and can be told to fail, so callers can assert how
/// often commits actually reached the store.
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    objects: Arc<RwLock<HashMap<String, ObjectBlocks>>>,
    stage_calls: Arc<AtomicUsize>,
    commit_calls: Arc<AtomicUsize>,
    fail_commits: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
    commit_delay: Arc<RwLock<Option<Duration>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_calls(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` commits fail with a backend error.
    pub fn fail_next_commits(&self, count: usize) {
        self.fail_commits.store(count, Ordering::SeqCst);
    }

    /// Simulate the store being unreachable for every operation.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every commit for `delay` so concurrent callers overlap.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *self.commit_delay.write() = delay;
    }

    pub fn object(&self, object_key: &str) -> Option<MemoryObject> {
        self.objects
            .read()
            .get(object_key)
            .and_then(|o| o.committed.clone())
    }

    pub fn staged_block(&self, object_key: &str, block_name: &str) -> Option<Bytes> {
        self.objects
            .read()
            .get(object_key)
            .and_then(|o| o.staged.get(block_name).cloned())
    }

    pub fn staged_count(&self, object_key: &str) -> usize {
        self.objects
            .read()
            .get(object_key)
            .map_or(0, |o| o.staged.len())
    }

    fn check_available(&self) -> BlobResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlobError::backend(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory block store marked unavailable",
            )));
        }
        Ok(())
    }

    fn take_commit_failure(&self) -> bool {
        self.fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn stage_block(
        &self,
        object_key: &str,
        block_name: &str,
        data: Bytes,
    ) -> BlobResult<StagedBlock> {
        self.check_available()?;
        self.stage_calls.fetch_add(1, Ordering::SeqCst);

        let size_bytes = data.len() as u64;
        self.objects
            .write()
            .entry(object_key.to_string())
            .or_default()
            .staged
            .insert(block_name.to_string(), data);

        Ok(StagedBlock {
            name: block_name.to_string(),
            size_bytes,
        })
    }

    async fn block_exists(&self, object_key: &str, block_name: &str) -> BlobResult<bool> {
        self.check_available()?;
        let objects = self.objects.read();
        Ok(objects.get(object_key).is_some_and(|o| {
            o.staged.contains_key(block_name)
                || o
                    .committed
                    .as_ref()
                    .is_some_and(|c| c.block_names.iter().any(|n| n == block_name))
        }))
    }

    async fn object_exists(&self, object_key: &str) -> BlobResult<bool> {
        self.check_available()?;
        Ok(self
            .objects
            .read()
            .get(object_key)
            .is_some_and(|o| o.committed.is_some()))
    }

    async fn commit_blocks(
        &self,
        object_key: &str,
        block_names: &[String],
        content: &ContentSettings,
    ) -> BlobResult<CommitResult> {
        self.check_available()?;
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.commit_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_commit_failure() {
            return Err(BlobError::backend(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected commit failure",
            )));
        }

        let mut objects = self.objects.write();
        let object = objects.entry(object_key.to_string()).or_default();

        let mut data = BytesMut::new();
        for name in block_names {
            let block = object
                .staged
                .get(name)
                .ok_or_else(|| BlobError::block_not_found(name.clone()))?;
            data.extend_from_slice(block);
        }

        // Committed blocks leave the staging area, like an Azure block list commit.
        for name in block_names {
            object.staged.remove(name);
        }

        let data = data.freeze();
        let size_bytes = data.len() as u64;
        object.committed = Some(MemoryObject {
            data,
            content: content.clone(),
            block_names: block_names.to_vec(),
        });

        Ok(CommitResult {
            object_key: object_key.to_string(),
            size_bytes,
            block_count: block_names.len() as u32,
            etag: None,
        })
    }

    async fn discard_blocks(&self, object_key: &str, block_names: &[String]) -> BlobResult<()> {
        self.check_available()?;
        let mut objects = self.objects.write();
        if let Some(object) = objects.get_mut(object_key) {
            for name in block_names {
                object.staged.remove(name);
            }
            if object.staged.is_empty() && object.committed.is_none() {
                objects.remove(object_key);
            }
        }
        Ok(())
    }

    async fn health(&self) -> BlobResult<()> {
        self.check_available()
    }
}
