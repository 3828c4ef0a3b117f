//! Fans `StoreChunks` requests out to the operator committee of a batch.

use std::{sync::Arc, time::Duration};

use lumen_basic_types::OperatorId;
use lumen_bls::Signature;
use lumen_config::DaDispatcherConfig;
use lumen_types::{BatchData, BatchHeader, ChunkAssignment};
use lumen_validator_client::{ClientError, ValidatorClientManager};
use tokio::sync::{mpsc, watch, Semaphore};

use crate::{metrics::METRICS, utils::retry};

/// Terminal outcome of one operator's dispersal: its signature over the
/// batch header hash, or the final error after the retry budget ran out.
#[derive(Debug)]
pub struct OperatorResponse {
    pub operator_id: OperatorId,
    pub result: Result<Signature, ClientError>,
}

/// Dispatches one batch to every committee member on a bounded worker pool
/// and surfaces the responses on a channel.
///
/// The channel closes when every operator has terminally responded; the
/// overall collection deadline is the consumer's concern, cancellation stops
/// outstanding attempts promptly.
#[derive(Debug)]
pub struct FanoutEngine {
    client_manager: Arc<ValidatorClientManager>,
    attestation_timeout: Duration,
    num_request_retries: u32,
    request_permits: Arc<Semaphore>,
}

impl FanoutEngine {
    pub fn new(client_manager: Arc<ValidatorClientManager>, config: &DaDispatcherConfig) -> Self {
        Self {
            client_manager,
            attestation_timeout: config.attestation_timeout(),
            num_request_retries: config.num_request_retries(),
            request_permits: Arc::new(Semaphore::new(config.node_request_concurrency())),
        }
    }

    /// Resolves the committee of `batch_data` and dispatches to each member.
    /// Operators with an empty chunk assignment are skipped.
    pub fn handle_batch(
        &self,
        batch_data: &BatchData,
        stop_receiver: watch::Receiver<bool>,
    ) -> mpsc::Receiver<OperatorResponse> {
        let quorums = batch_data.quorums();
        let committee = batch_data.operator_state.committee(&quorums);
        let (tx, rx) = mpsc::channel(committee.len().max(1));

        for (operator_id, info) in committee {
            let operator_quorums = batch_data.operator_state.quorums_of(&operator_id, &quorums);
            let assignment = ChunkAssignment::for_operator(&batch_data.batch, &operator_quorums);
            if assignment.is_empty() {
                continue;
            }

            tokio::spawn(dispatch_to_operator(DispatchTask {
                operator_id,
                socket: info.socket.clone(),
                batch_header: batch_data.batch.header,
                assignment,
                client_manager: self.client_manager.clone(),
                attestation_timeout: self.attestation_timeout,
                num_request_retries: self.num_request_retries,
                permits: self.request_permits.clone(),
                stop_receiver: stop_receiver.clone(),
                tx: tx.clone(),
            }));
        }

        rx
    }
}

struct DispatchTask {
    operator_id: OperatorId,
    socket: String,
    batch_header: BatchHeader,
    assignment: ChunkAssignment,
    client_manager: Arc<ValidatorClientManager>,
    attestation_timeout: Duration,
    num_request_retries: u32,
    permits: Arc<Semaphore>,
    stop_receiver: watch::Receiver<bool>,
    tx: mpsc::Sender<OperatorResponse>,
}

async fn dispatch_to_operator(task: DispatchTask) {
    let DispatchTask {
        operator_id,
        socket,
        batch_header,
        assignment,
        client_manager,
        attestation_timeout,
        num_request_retries,
        permits,
        mut stop_receiver,
        tx,
    } = task;

    let Ok(_permit) = permits.acquire().await else {
        return;
    };

    let latency = METRICS.store_chunks_latency.start();
    let attempts_fut = async {
        let client = client_manager
            .get_client(&socket)
            .await
            .map_err(ClientError::permanent)?;

        let (result, attempts) = retry(num_request_retries, &socket, || async {
            match tokio::time::timeout(
                attestation_timeout,
                client.store_chunks(&batch_header, &assignment),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ClientError::transient(anyhow::anyhow!(
                    "store_chunks timed out after {attestation_timeout:?}"
                ))),
            }
        })
        .await;
        METRICS.store_chunks_attempts.observe(attempts);
        result
    };

    let result = tokio::select! {
        result = attempts_fut => result,
        _ = wait_for_stop(&mut stop_receiver) => {
            Err(ClientError::permanent(anyhow::anyhow!("dispatch cancelled")))
        }
    };
    latency.observe();

    if result.is_err() {
        METRICS.operators_nonsigning.inc();
    }

    // The receiver may already have hit its deadline; dropped responses are
    // equivalent to non-signing operators.
    let _ = tx
        .send(OperatorResponse {
            operator_id,
            result,
        })
        .await;
}

async fn wait_for_stop(stop_receiver: &mut watch::Receiver<bool>) {
    while !*stop_receiver.borrow_and_update() {
        if stop_receiver.changed().await.is_err() {
            // Sender gone without a stop signal; dispatch runs to completion.
            std::future::pending::<()>().await;
        }
    }
}
