//! Builds dispatch batches out of the encoded-blob queue.

use std::sync::Arc;

use lumen_basic_types::BlobKey;
use lumen_dal::{BlobMetadataStore, Cursor, DalError};
use lumen_merkle_tree::MerkleTree;
use lumen_types::{
    Batch, BatchData, BatchHeader, BlobCertificate, BlobInclusionInfo, BlobStatus,
};

use crate::{
    blob_set::BlobSet,
    metrics::METRICS,
    traits::{BeforeDispatchHook, ChainStateReader},
    utils::retry,
};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The encoded queue had no eligible candidates this tick. Expected
    /// during idle periods; logged at debug by the loop.
    #[error("no blobs to dispatch")]
    NoBlobsToDispatch,
    #[error(transparent)]
    Dal(#[from] DalError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Pulls `Encoded` blobs through a `(updated_at, key)` cursor and turns them
/// into batches: Merkle root over the certificate hashes, inclusion proof
/// per blob, durable `GatheringSignatures` claim.
///
/// The cursor sweeps the queue fairly; once a sweep reaches the end it
/// resets, so stale rows (retries with an old `updated_at`) are picked up on
/// the next pass.
pub struct BatchBuilder {
    store: Arc<dyn BlobMetadataStore>,
    chain_state: Arc<dyn ChainStateReader>,
    blob_set: Arc<BlobSet>,
    max_batch_size: usize,
    finalization_block_delay: u64,
    num_request_retries: u32,
    cursor: Option<Cursor>,
    before_dispatch: Option<BeforeDispatchHook>,
}

impl std::fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("max_batch_size", &self.max_batch_size)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl BatchBuilder {
    pub fn new(
        store: Arc<dyn BlobMetadataStore>,
        chain_state: Arc<dyn ChainStateReader>,
        blob_set: Arc<BlobSet>,
        max_batch_size: usize,
        finalization_block_delay: u64,
        num_request_retries: u32,
        before_dispatch: Option<BeforeDispatchHook>,
    ) -> Self {
        Self {
            store,
            chain_state,
            blob_set,
            max_batch_size,
            finalization_block_delay,
            num_request_retries,
            cursor: None,
            before_dispatch,
        }
    }

    /// Current cursor position; `None` right after a full sweep.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub async fn new_batch(&mut self) -> Result<BatchData, BatchError> {
        let latency = METRICS.batch_build_latency.start();

        let current_block = self.chain_state.get_current_block().await?;
        let reference_block = current_block - self.finalization_block_delay;

        let page = self
            .store
            .fetch_encoded(self.cursor, self.max_batch_size)
            .await?;
        let end_reached = page.blobs.len() < self.max_batch_size;

        let candidates: Vec<BlobKey> = page
            .blobs
            .iter()
            .map(|(blob_key, _)| *blob_key)
            .filter(|blob_key| !self.blob_set.contains(blob_key))
            .take(self.max_batch_size)
            .collect();

        // A finished sweep resets the cursor so that stale rows (with an
        // `updated_at` older than anything already processed) are seen on
        // the next tick.
        if end_reached && candidates.len() < self.max_batch_size {
            self.cursor = None;
        } else {
            self.cursor = page.next_cursor;
        }

        let mut blob_keys = Vec::with_capacity(candidates.len());
        let mut certificates: Vec<BlobCertificate> = Vec::with_capacity(candidates.len());
        for blob_key in candidates {
            match self.store.get_certificate(blob_key).await {
                Ok(certificate) => {
                    blob_keys.push(blob_key);
                    certificates.push(certificate);
                }
                Err(DalError::NotFound) => {
                    // The key was fetched as `Encoded` moments ago, so this
                    // is a store invariant violation; drop the key and go on.
                    tracing::error!("No certificate found for encoded blob {blob_key}, dropping");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if certificates.is_empty() {
            return Err(BatchError::NoBlobsToDispatch);
        }

        let leaves: Vec<[u8; 32]> = certificates.iter().map(BlobCertificate::hash).collect();
        let tree = MerkleTree::new(leaves);
        let header = BatchHeader {
            batch_root: tree.root(),
            reference_block,
        };

        let inclusion_infos: Vec<BlobInclusionInfo> = blob_keys
            .iter()
            .enumerate()
            .map(|(index, blob_key)| BlobInclusionInfo {
                blob_key: *blob_key,
                batch_header: header,
                blob_index: index as u32,
                inclusion_proof: tree.merkle_path(index),
            })
            .collect();

        self.claim_blobs(&blob_keys).await;
        for blob_key in &blob_keys {
            self.blob_set.add_blob(*blob_key);
        }

        let operator_state = self.chain_state.get_operator_state(reference_block).await?;

        METRICS.batch_size.observe(certificates.len());
        METRICS.last_reference_block.set(reference_block.0 as usize);
        latency.observe();

        Ok(BatchData {
            batch_header_hash: header.hash(),
            batch: Batch {
                header,
                certificates,
            },
            blob_keys,
            inclusion_infos,
            operator_state,
        })
    }

    /// Transitions the chosen blobs to `GatheringSignatures` and runs the
    /// before-dispatch hook. The durable transition is what prevents double
    /// dispatch across process restarts; failures are logged and the blob
    /// stays in the batch, since every downstream write is idempotent.
    async fn claim_blobs(&self, blob_keys: &[BlobKey]) {
        for blob_key in blob_keys {
            let (result, _) = retry(self.num_request_retries, "update_blob_status", || {
                self.store
                    .update_blob_status(*blob_key, BlobStatus::GatheringSignatures)
            })
            .await;
            if let Err(err) = result {
                tracing::error!("Failed to claim blob {blob_key} for dispatch: {err}");
                continue;
            }

            if let Some(hook) = &self.before_dispatch {
                if let Err(err) = hook(*blob_key) {
                    tracing::warn!("before-dispatch hook failed for blob {blob_key}: {err}");
                }
            }
        }
    }
}
