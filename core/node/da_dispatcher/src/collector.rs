//! Drains operator signatures for one batch under the collection deadline
//! and turns them into an attestation plus terminal blob statuses.

use std::sync::Arc;

use lumen_basic_types::time::nanos_since_epoch;
use lumen_config::DaDispatcherConfig;
use lumen_health_check::LivenessSender;
use lumen_types::{Attestation, BatchData, BlobStatus};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::{
    aggregator::{QuorumThresholds, SignatureAggregator},
    blob_set::BlobSet,
    fanout::OperatorResponse,
    metrics::METRICS,
    utils::hex_fmt,
    writer::AttestationWriter,
};

pub const COMPONENT: &str = "dispatcher";

#[derive(Debug)]
pub struct SignatureCollector {
    writer: AttestationWriter,
    blob_set: Arc<BlobSet>,
    liveness: LivenessSender,
    config: DaDispatcherConfig,
}

impl SignatureCollector {
    pub fn new(
        writer: AttestationWriter,
        blob_set: Arc<BlobSet>,
        liveness: LivenessSender,
        config: DaDispatcherConfig,
    ) -> Self {
        Self {
            writer,
            blob_set,
            liveness,
            config,
        }
    }

    /// Consumes the fan-out channel until it closes or the batch deadline
    /// fires; then finalizes the attestation and persists the batch.
    /// Returns the attestation.
    ///
    /// Every committee member produces a terminal response, so the channel
    /// closes as soon as the last operator settles; collection is never
    /// cut short while a timely signature is still in flight.
    pub async fn handle_signatures(
        &self,
        batch_data: &BatchData,
        mut responses: mpsc::Receiver<OperatorResponse>,
    ) -> anyhow::Result<Attestation> {
        let latency = METRICS.signature_collection_latency.start();
        let quorums = batch_data.quorums();
        let thresholds: QuorumThresholds = quorums
            .iter()
            .map(|quorum| (*quorum, self.config.confirmation_threshold(*quorum)))
            .collect();
        let mut aggregator = SignatureAggregator::new(
            batch_data.batch.header,
            batch_data.operator_state.clone(),
            quorums,
        );

        let deadline = Instant::now() + self.config.batch_attestation_timeout();
        let mut tick = tokio::time::interval(self.config.signature_tick_interval());
        self.liveness.notify(COMPONENT);

        loop {
            tokio::select! {
                response = responses.recv() => match response {
                    Some(OperatorResponse { operator_id, result }) => match result {
                        Ok(signature) => {
                            aggregator.observe(operator_id, signature);
                            self.liveness.notify(COMPONENT);
                        }
                        Err(err) => {
                            tracing::warn!("Operator {operator_id} did not sign: {err}");
                        }
                    },
                    None => {
                        if aggregator.is_satisfied(&thresholds) {
                            tracing::debug!(
                                "Every quorum of batch {} met its confirmation threshold",
                                hex_fmt(&batch_data.batch_header_hash)
                            );
                        }
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        "Batch attestation deadline hit for batch {} with {} signatures collected",
                        hex_fmt(&batch_data.batch_header_hash),
                        aggregator.signer_count()
                    );
                    break;
                }
                _ = tick.tick() => {
                    self.liveness.notify(COMPONENT);
                }
            }
        }

        let attestation = aggregator.finalize(&thresholds, nanos_since_epoch());
        latency.observe();

        self.finalize_batch(batch_data, &attestation).await?;
        Ok(attestation)
    }

    /// Persists the attestation artifacts and the per-blob verdicts: a blob
    /// completes iff its whole quorum set is attested. Batch keys leave the
    /// in-flight set regardless of the outcome.
    async fn finalize_batch(
        &self,
        batch_data: &BatchData,
        attestation: &Attestation,
    ) -> anyhow::Result<()> {
        let persisted = self.writer.persist_batch(batch_data, attestation).await;

        if persisted.is_ok() {
            for (blob_key, certificate) in batch_data
                .blob_keys
                .iter()
                .zip(&batch_data.batch.certificates)
            {
                let status = if attestation.covers(&certificate.blob_header.quorums) {
                    METRICS.blobs_complete.inc();
                    BlobStatus::Complete
                } else {
                    METRICS.blobs_failed.inc();
                    BlobStatus::Failed
                };
                if let Err(err) = self.writer.finalize_blob(*blob_key, status).await {
                    tracing::error!("Failed to finalize blob {blob_key}: {err:#}");
                }
            }
        }

        for blob_key in &batch_data.blob_keys {
            self.blob_set.remove_blob(blob_key);
        }
        persisted
    }
}

