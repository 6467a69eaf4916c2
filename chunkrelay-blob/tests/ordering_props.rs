use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chunkrelay_blob::{
    BlobConfig, BlockIdEncoder, ChunkOutcome, ChunkUpload, FinalizeGate, MemoryBlockStore,
    MemoryUploadSessionStore,
};
use chunkrelay_core::{PipelineLauncher, RelayError, RunId, UploadIdentifier};
use proptest::prelude::*;

#[derive(Default)]
struct CountingLauncher {
    launches: AtomicUsize,
}

#[async_trait]
impl PipelineLauncher for CountingLauncher {
    async fn launch(&self, _identifier: &UploadIdentifier) -> Result<RunId, RelayError> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(RunId::from_string(format!("run-{n}")))
    }
}

/// Total chunk count plus every chunk number at least once, with duplicates, shuffled.
fn arrivals() -> impl Strategy<Value = (u32, Vec<u32>)> {
    (1u32..10).prop_flat_map(|total| {
        (Just(total), proptest::collection::vec(1..=total, 0..10)).prop_flat_map(
            |(total, extras)| {
                let mut all: Vec<u32> = (1..=total).collect();
                all.extend(extras);
                (Just(total), Just(all).prop_shuffle())
            },
        )
    })
}

fn body(chunk: u32) -> String {
    format!("{chunk},value-{chunk}\n")
}

proptest! {
    #[test]
    fn any_arrival_order_commits_and_triggers_once((total, order) in arrivals()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let store = MemoryBlockStore::new();
        let launcher = Arc::new(CountingLauncher::default());
        let gate = FinalizeGate::new(
            Arc::new(store.clone()),
            Arc::new(MemoryUploadSessionStore::new()),
            launcher.clone(),
            BlobConfig::default(),
        )
        .unwrap();
        let identifier = UploadIdentifier::parse("prop-upload").unwrap();

        let outcomes = runtime.block_on(async {
            let mut outcomes = Vec::new();
            for chunk in &order {
                let upload = ChunkUpload::new(identifier.clone(), *chunk, total, body(*chunk));
                outcomes.push(gate.accept_chunk(upload).await.unwrap());
            }
            outcomes
        });

        prop_assert_eq!(store.commit_calls(), 1);
        prop_assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

        let run_ids: HashSet<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                ChunkOutcome::Finalized { run_id } => Some(run_id.clone()),
                ChunkOutcome::Progress { .. } => None,
            })
            .collect();
        prop_assert_eq!(run_ids.len(), 1);

        let expected: String = (1..=total).map(body).collect();
        let object = store.object("prop-upload").unwrap();
        prop_assert_eq!(&object.data[..], expected.as_bytes());
    }

    #[test]
    fn block_names_are_uniform_and_distinct(
        identifier in "[A-Za-z0-9._-]{1,40}",
        total in 1u32..500,
    ) {
        let encoder = BlockIdEncoder::default();
        let names = encoder.ordered_names(&identifier, total).unwrap();

        let lengths: HashSet<_> = names.iter().map(String::len).collect();
        prop_assert_eq!(lengths.len(), 1);

        let distinct: HashSet<_> = names.iter().collect();
        prop_assert_eq!(distinct.len(), names.len());

        for (index, name) in names.iter().enumerate() {
            let (decoded_id, chunk) = encoder.decode(name).unwrap();
            prop_assert_eq!(decoded_id, identifier.clone());
            prop_assert_eq!(chunk, index as u32 + 1);
            prop_assert_eq!(encoder.encode(&identifier, chunk).unwrap(), name.clone());
        }
    }
}
