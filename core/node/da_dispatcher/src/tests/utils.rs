//! Fixtures shared by the dispatcher tests: deterministic operators, a
//! scriptable mock of the operator RPC, and a fixed chain-state view.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use lumen_basic_types::{BlobKey, L1BlockNumber, OperatorId, QuorumId, StakeAmount};
use lumen_bls::{keccak256, BlsKeyPair, Signature};
use lumen_dal::MemoryBlobMetadataStore;
use lumen_types::{
    BatchHeader, BlobCertificate, BlobHeader, ChunkAssignment, OperatorInfo, OperatorState,
    PaymentMetadata,
};
use lumen_validator_client::{ClientError, ValidatorClient, ValidatorClientManager};
use rand::{rngs::StdRng, SeedableRng};

pub(crate) const CURRENT_BLOCK: L1BlockNumber = L1BlockNumber(110);
pub(crate) const REFERENCE_BLOCK: L1BlockNumber = L1BlockNumber(100);

#[derive(Debug, Clone)]
pub(crate) struct TestOperator {
    pub id: OperatorId,
    pub keypair: BlsKeyPair,
    pub socket: String,
}

impl TestOperator {
    pub fn new(index: u8) -> Self {
        Self {
            id: OperatorId([index; 32]),
            keypair: BlsKeyPair::random(&mut StdRng::seed_from_u64(index as u64)),
            socket: format!("http://operator-{index}:3000"),
        }
    }
}

/// Builds an operator-state snapshot from `(quorum, [(operator, stake)])`
/// membership rows.
pub(crate) fn operator_state(
    memberships: &[(u8, &[(&TestOperator, StakeAmount)])],
    block: L1BlockNumber,
) -> Arc<OperatorState> {
    let mut operators: HashMap<QuorumId, HashMap<OperatorId, OperatorInfo>> = HashMap::new();
    for (quorum, members) in memberships {
        let entry = operators.entry(QuorumId(*quorum)).or_default();
        for (operator, stake) in *members {
            entry.insert(
                operator.id,
                OperatorInfo {
                    stake: *stake,
                    public_key_g1: operator.keypair.public_key_g1(),
                    public_key_g2: operator.keypair.public_key_g2(),
                    socket: operator.socket.clone(),
                },
            );
        }
    }
    Arc::new(OperatorState::new(operators, block))
}

/// Per-operator behavior of the mocked dispersal endpoint.
#[derive(Debug, Clone)]
pub(crate) enum OperatorBehavior {
    /// Sign the batch header hash and return the signature.
    Sign,
    /// Fail every call with a non-retriable error.
    FailPermanent,
    /// Fail the first `n` calls with a retriable error, then sign.
    TransientThenSign(u32),
    /// Hang past any per-attempt deadline.
    Stall(Duration),
    /// Return a well-formed signature over the wrong message.
    SignWrongMessage,
}

#[derive(Debug)]
pub(crate) struct MockValidatorClient {
    keypair: BlsKeyPair,
    behavior: OperatorBehavior,
    failures_left: AtomicU32,
    calls: Arc<AtomicUsize>,
}

impl MockValidatorClient {
    pub fn new(keypair: BlsKeyPair, behavior: OperatorBehavior, calls: Arc<AtomicUsize>) -> Self {
        let failures_left = match &behavior {
            OperatorBehavior::TransientThenSign(n) => AtomicU32::new(*n),
            _ => AtomicU32::new(0),
        };
        Self {
            keypair,
            behavior,
            failures_left,
            calls,
        }
    }
}

#[async_trait]
impl ValidatorClient for MockValidatorClient {
    async fn store_chunks(
        &self,
        batch_header: &BatchHeader,
        _assignment: &ChunkAssignment,
    ) -> Result<Signature, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            OperatorBehavior::Sign => Ok(self.keypair.sign(&batch_header.hash())),
            OperatorBehavior::FailPermanent => {
                Err(ClientError::permanent(anyhow::anyhow!("operator offline")))
            }
            OperatorBehavior::TransientThenSign(_) => {
                let remaining = self.failures_left.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.failures_left.store(remaining - 1, Ordering::SeqCst);
                    Err(ClientError::transient(anyhow::anyhow!("connection reset")))
                } else {
                    Ok(self.keypair.sign(&batch_header.hash()))
                }
            }
            OperatorBehavior::Stall(duration) => {
                tokio::time::sleep(*duration).await;
                Err(ClientError::transient(anyhow::anyhow!("stalled")))
            }
            OperatorBehavior::SignWrongMessage => {
                Ok(self.keypair.sign(&keccak256(b"unrelated message")))
            }
        }
    }

    fn clone_boxed(&self) -> Box<dyn ValidatorClient> {
        Box::new(Self::new(
            self.keypair.clone(),
            self.behavior.clone(),
            self.calls.clone(),
        ))
    }
}

/// Client manager whose factory resolves sockets to mocked operators.
pub(crate) fn mock_client_manager(
    operators: &[(&TestOperator, OperatorBehavior)],
) -> (Arc<ValidatorClientManager>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let behaviors: HashMap<String, (BlsKeyPair, OperatorBehavior)> = operators
        .iter()
        .map(|(operator, behavior)| {
            (
                operator.socket.clone(),
                (operator.keypair.clone(), behavior.clone()),
            )
        })
        .collect();

    let call_counter = calls.clone();
    let manager = ValidatorClientManager::new(Box::new(move |socket| {
        let (keypair, behavior) = behaviors
            .get(socket)
            .ok_or_else(|| anyhow::anyhow!("unknown socket {socket}"))?
            .clone();
        Ok(Arc::new(MockValidatorClient::new(
            keypair,
            behavior,
            call_counter.clone(),
        )) as Arc<dyn ValidatorClient>)
    }));
    (Arc::new(manager), calls)
}

/// Chain-state view pinned to one snapshot.
#[derive(Debug)]
pub(crate) struct FixedChainState {
    pub state: Arc<OperatorState>,
    pub current_block: L1BlockNumber,
}

#[async_trait]
impl crate::traits::ChainStateReader for FixedChainState {
    async fn get_current_block(&self) -> anyhow::Result<L1BlockNumber> {
        Ok(self.current_block)
    }

    async fn get_operator_state(
        &self,
        _block: L1BlockNumber,
    ) -> anyhow::Result<Arc<OperatorState>> {
        Ok(self.state.clone())
    }
}

pub(crate) fn certificate(tag: u8, quorums: &[u8]) -> BlobCertificate {
    BlobCertificate {
        blob_header: BlobHeader {
            version: 0,
            quorums: quorums.iter().map(|quorum| QuorumId(*quorum)).collect(),
            commitment: vec![tag],
            payment: PaymentMetadata::default(),
        },
        relay_keys: vec![0],
        signature: None,
    }
}

/// Seeds `store` with encoded blobs and returns their keys.
pub(crate) fn seed_blobs(
    store: &MemoryBlobMetadataStore,
    specs: &[(u8, &[u8])],
) -> Vec<BlobKey> {
    specs
        .iter()
        .map(|(tag, quorums)| store.insert_blob(certificate(*tag, quorums), u64::MAX))
        .collect()
}
