use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use assert_matches::assert_matches;
use lumen_dal::{BlobMetadataStore, MemoryBlobMetadataStore};
use lumen_merkle_tree::verify_merkle_path;
use lumen_types::{BlobStatus, OperatorState};

use crate::{
    batcher::{BatchBuilder, BatchError},
    blob_set::BlobSet,
    tests::utils::{
        certificate, operator_state, seed_blobs, FixedChainState, TestOperator, CURRENT_BLOCK,
        REFERENCE_BLOCK,
    },
    traits::BeforeDispatchHook,
};

fn minimal_state() -> Arc<OperatorState> {
    let operator = TestOperator::new(0);
    operator_state(&[(0, &[(&operator, 100)])], REFERENCE_BLOCK)
}

fn builder(
    store: Arc<MemoryBlobMetadataStore>,
    blob_set: Arc<BlobSet>,
    max_batch_size: usize,
    before_dispatch: Option<BeforeDispatchHook>,
) -> BatchBuilder {
    let chain_state = Arc::new(FixedChainState {
        state: minimal_state(),
        current_block: CURRENT_BLOCK,
    });
    BatchBuilder::new(
        store,
        chain_state,
        blob_set,
        max_batch_size,
        10,
        1,
        before_dispatch,
    )
}

// An oversized queue is drained in max-batch-size steps, and the exhausted
// queue raises `NoBlobsToDispatch`.
#[tokio::test]
async fn batches_respect_max_batch_size() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    let specs: Vec<(u8, &[u8])> = (0..12).map(|tag| (tag, &[0u8][..])).collect();
    let keys = seed_blobs(&store, &specs);

    let mut builder = builder(store.clone(), Arc::new(BlobSet::new()), 5, None);

    let batch = builder.new_batch().await.unwrap();
    assert_eq!(batch.blob_keys, keys[..5]);
    let batch = builder.new_batch().await.unwrap();
    assert_eq!(batch.blob_keys, keys[5..10]);
    let batch = builder.new_batch().await.unwrap();
    assert_eq!(batch.blob_keys, keys[10..]);

    assert_matches!(
        builder.new_batch().await,
        Err(BatchError::NoBlobsToDispatch)
    );
}

// The batch header references `current block - finalization delay`, and
// every inclusion proof verifies against the batch root with contiguous
// indices.
#[tokio::test]
async fn inclusion_proofs_verify_against_batch_root() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    seed_blobs(&store, &[(0, &[0]), (1, &[0, 1]), (2, &[1])]);

    let mut builder = builder(store, Arc::new(BlobSet::new()), 10, None);
    let batch = builder.new_batch().await.unwrap();

    assert_eq!(batch.batch.header.reference_block, REFERENCE_BLOCK);
    assert_eq!(batch.inclusion_infos.len(), 3);

    for (index, info) in batch.inclusion_infos.iter().enumerate() {
        assert_eq!(info.blob_index, index as u32);
        assert_eq!(info.batch_header, batch.batch.header);
        let leaf = batch.batch.certificates[index].hash();
        assert!(verify_merkle_path(
            &leaf,
            index,
            &info.inclusion_proof,
            &batch.batch.header.batch_root,
        ));
    }
}

// Chosen blobs are durably claimed and tracked in the in-flight set.
#[tokio::test]
async fn chosen_blobs_are_claimed() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    let keys = seed_blobs(&store, &[(0, &[0]), (1, &[0])]);

    let blob_set = Arc::new(BlobSet::new());
    let mut builder = builder(store.clone(), blob_set.clone(), 10, None);
    builder.new_batch().await.unwrap();

    for key in &keys {
        assert_eq!(
            store.get_blob_metadata(*key).await.unwrap().status,
            BlobStatus::GatheringSignatures
        );
        assert!(blob_set.contains(key));
    }
}

// A key already in flight is filtered out; if it was the only candidate the
// tick is a quiet no-op.
#[tokio::test]
async fn in_flight_blobs_are_deduplicated() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    let keys = seed_blobs(&store, &[(0, &[0])]);

    let blob_set = Arc::new(BlobSet::new());
    blob_set.add_blob(keys[0]);

    let mut builder = builder(store, blob_set, 10, None);
    assert_matches!(
        builder.new_batch().await,
        Err(BatchError::NoBlobsToDispatch)
    );
}

// A retried blob inserted behind the cursor is picked up after the sweep
// resets.
#[tokio::test]
async fn stale_blob_is_picked_up_after_cursor_reset() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    let keys = seed_blobs(&store, &[(0, &[0]), (1, &[0]), (2, &[0])]);

    let mut builder = builder(store.clone(), Arc::new(BlobSet::new()), 2, None);

    let batch = builder.new_batch().await.unwrap();
    assert_eq!(batch.blob_keys, keys[..2]);
    assert!(builder.cursor().is_some());

    // A retry lands with an `updated_at` far behind the cursor.
    let stale_key = store.insert_blob_at(certificate(9, &[0]), u64::MAX, 1);

    // This sweep still runs from the cursor and only sees the tail...
    let batch = builder.new_batch().await.unwrap();
    assert_eq!(batch.blob_keys, keys[2..]);
    assert!(builder.cursor().is_none());

    // ...and the reset sweep picks the stale blob up.
    let batch = builder.new_batch().await.unwrap();
    assert_eq!(batch.blob_keys, vec![stale_key]);
}

// A metadata row whose certificate went missing is dropped with the rest of
// the batch intact.
#[tokio::test]
async fn missing_certificate_drops_only_that_blob() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    let keys = seed_blobs(&store, &[(0, &[0]), (1, &[0])]);
    store.remove_certificate(&keys[0]);

    let mut builder = builder(store.clone(), Arc::new(BlobSet::new()), 10, None);
    let batch = builder.new_batch().await.unwrap();

    assert_eq!(batch.blob_keys, vec![keys[1]]);
    // The dropped key was not claimed.
    assert_eq!(
        store.get_blob_metadata(keys[0]).await.unwrap().status,
        BlobStatus::Encoded
    );
}

// The before-dispatch hook fires once per claimed key; its errors do not
// abort the batch.
#[tokio::test]
async fn before_dispatch_hook_runs_per_blob() {
    let store = Arc::new(MemoryBlobMetadataStore::new());
    seed_blobs(&store, &[(0, &[0]), (1, &[0])]);

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let hook: BeforeDispatchHook = Arc::new(move |_key| {
        counter.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("upstream tracking already dropped")
    });

    let mut builder = builder(store, Arc::new(BlobSet::new()), 10, Some(hook));
    let batch = builder.new_batch().await.unwrap();

    assert_eq!(batch.blob_keys.len(), 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}
