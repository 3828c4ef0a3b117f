//! Ordered, idempotent persistence of a finished batch.
//!
//! Write order is part of the contract: batch header first, then every
//! inclusion info, then the attestation, then the per-blob terminal
//! statuses. An attestation becoming visible therefore implies all of its
//! inclusion infos already are, and a crashed run can safely be repeated
//! since every write is keyed by batch header hash and blob key.

use std::sync::Arc;

use anyhow::Context as _;
use lumen_basic_types::BlobKey;
use lumen_dal::{BlobMetadataStore, DalError};
use lumen_types::{Attestation, BatchData, BlobStatus};

use crate::utils::{hex_fmt, retry};

#[derive(Debug)]
pub struct AttestationWriter {
    store: Arc<dyn BlobMetadataStore>,
    num_request_retries: u32,
}

impl AttestationWriter {
    pub fn new(store: Arc<dyn BlobMetadataStore>, num_request_retries: u32) -> Self {
        Self {
            store,
            num_request_retries,
        }
    }

    /// Persists the batch header, all inclusion infos, and the attestation,
    /// in that order. Transient store errors are retried; conflicts are
    /// resolved by re-reading and comparing against what we meant to write.
    pub async fn persist_batch(
        &self,
        batch_data: &BatchData,
        attestation: &Attestation,
    ) -> anyhow::Result<()> {
        let batch_header_hash = batch_data.batch_header_hash;

        let result = self
            .write_with_retry("put_batch_header", || {
                self.store
                    .put_batch_header(batch_header_hash, &batch_data.batch.header)
            })
            .await;
        if let Err(DalError::Conflict(_)) = &result {
            let stored = self.store.get_batch_header(batch_header_hash).await?;
            anyhow::ensure!(
                stored == batch_data.batch.header,
                "conflicting batch header stored for batch {}",
                hex_fmt(&batch_header_hash)
            );
        } else {
            result.context("failed to persist batch header")?;
        }

        for info in &batch_data.inclusion_infos {
            let result = self
                .write_with_retry("put_inclusion_info", || self.store.put_inclusion_info(info))
                .await;
            if let Err(DalError::Conflict(_)) = &result {
                let stored = self
                    .store
                    .get_inclusion_info(info.blob_key, batch_header_hash)
                    .await?;
                anyhow::ensure!(
                    stored == *info,
                    "conflicting inclusion info stored for blob {}",
                    info.blob_key
                );
            } else {
                result.with_context(|| {
                    format!("failed to persist inclusion info for blob {}", info.blob_key)
                })?;
            }
        }

        let result = self
            .write_with_retry("put_attestation", || {
                self.store.put_attestation(batch_header_hash, attestation)
            })
            .await;
        if let Err(DalError::Conflict(_)) = &result {
            // An attestation row already exists for this batch; the stored
            // one is authoritative.
            self.store.get_attestation(batch_header_hash).await?;
            tracing::info!(
                "Attestation for batch {} already persisted",
                hex_fmt(&batch_header_hash)
            );
        } else {
            result.context("failed to persist attestation")?;
        }

        Ok(())
    }

    /// Applies a blob's terminal status. Re-running after a crash finds the
    /// status already applied; that is treated as success.
    pub async fn finalize_blob(&self, blob_key: BlobKey, status: BlobStatus) -> anyhow::Result<()> {
        let result = self
            .write_with_retry("update_blob_status", || {
                self.store.update_blob_status(blob_key, status)
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(DalError::IllegalTransition { from, .. }) if from == status => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to finalize status of blob {blob_key}"))
            }
        }
    }

    async fn write_with_retry<Fut>(
        &self,
        label: &str,
        f: impl FnMut() -> Fut,
    ) -> Result<(), DalError>
    where
        Fut: std::future::Future<Output = Result<(), DalError>>,
    {
        let (result, _) = retry(self.num_request_retries, label, f).await;
        result
    }
}

