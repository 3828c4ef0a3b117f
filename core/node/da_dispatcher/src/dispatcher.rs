//! The periodic driver composing batching, fan-out and collection.

use std::sync::Arc;

use lumen_config::DaDispatcherConfig;
use lumen_dal::BlobMetadataStore;
use lumen_health_check::LivenessSender;
use lumen_validator_client::ValidatorClientManager;
use tokio::sync::watch;

use crate::{
    batcher::{BatchBuilder, BatchError},
    blob_set::BlobSet,
    collector::{SignatureCollector, COMPONENT},
    fanout::FanoutEngine,
    metrics::METRICS,
    traits::{BeforeDispatchHook, ChainStateReader},
    writer::AttestationWriter,
};

/// The dispatcher service. One instance runs per disperser deployment; two
/// concurrent instances would race on the encoded queue, so horizontal scale
/// requires external leader election.
#[derive(Debug)]
pub struct DaDispatcher {
    config: DaDispatcherConfig,
    batcher: BatchBuilder,
    fanout: FanoutEngine,
    collector: SignatureCollector,
    blob_set: Arc<BlobSet>,
    liveness: LivenessSender,
}

impl DaDispatcher {
    pub fn new(
        config: DaDispatcherConfig,
        store: Arc<dyn BlobMetadataStore>,
        chain_state: Arc<dyn ChainStateReader>,
        client_manager: Arc<ValidatorClientManager>,
        liveness: LivenessSender,
        before_dispatch: Option<BeforeDispatchHook>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let blob_set = Arc::new(BlobSet::new());
        let batcher = BatchBuilder::new(
            store.clone(),
            chain_state,
            blob_set.clone(),
            config.max_batch_size(),
            config.finalization_block_delay,
            config.num_request_retries(),
            before_dispatch,
        );
        let fanout = FanoutEngine::new(client_manager, &config);
        let writer = AttestationWriter::new(store, config.num_request_retries());
        let collector = SignatureCollector::new(
            writer,
            blob_set.clone(),
            liveness.clone(),
            config.clone(),
        );

        Ok(Self {
            config,
            batcher,
            fanout,
            collector,
            blob_set,
            liveness,
        })
    }

    /// Blob keys currently claimed by an in-flight batch.
    pub fn blob_set(&self) -> &Arc<BlobSet> {
        &self.blob_set
    }

    pub async fn run(mut self, mut stop_receiver: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut timer = tokio::time::interval(self.config.pull_interval());

        while !*stop_receiver.borrow_and_update() {
            tokio::select! {
                _ = timer.tick() => { /* continue iterations */ }
                _ = stop_receiver.changed() => break,
            }

            self.liveness.notify(COMPONENT);
            match self.loop_iteration(stop_receiver.clone()).await {
                Ok(()) => {}
                Err(BatchError::NoBlobsToDispatch) => {
                    tracing::debug!("No blobs to dispatch");
                }
                Err(err) => {
                    METRICS.errors.inc();
                    tracing::error!("Failed to process batch: {err:#}");
                    // The tick is skipped, but the process stays alive; the
                    // heartbeat marks the dispatcher as degraded rather than
                    // dead.
                    self.liveness.notify(COMPONENT);
                }
            }
        }

        tracing::info!("Stop signal received, da_dispatcher is shutting down");
        Ok(())
    }

    pub async fn loop_iteration(
        &mut self,
        stop_receiver: watch::Receiver<bool>,
    ) -> Result<(), BatchError> {
        let batch_data = self.batcher.new_batch().await?;
        tracing::info!(
            "Dispatching batch with {} blobs at reference block {}",
            batch_data.blob_keys.len(),
            batch_data.batch.header.reference_block
        );

        let responses = self.fanout.handle_batch(&batch_data, stop_receiver);
        let attestation = self
            .collector
            .handle_signatures(&batch_data, responses)
            .await?;

        tracing::info!(
            "Finished batch with {} attested quorums out of {}",
            attestation.quorum_numbers.len(),
            batch_data.quorums().len()
        );
        Ok(())
    }
}
