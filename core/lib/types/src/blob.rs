//! Blob-level types: headers, certificates, and the dispatch state machine.

use lumen_basic_types::{BlobKey, QuorumId};
use lumen_bls::keccak256;
use serde::{Deserialize, Serialize};

/// Payment metadata carried in a blob header. Opaque to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub account: String,
    pub timestamp_ns: u64,
    pub cumulative_payment: u128,
}

/// Header of a dispersed blob. Its keccak256 digest is the blob key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub version: u16,
    /// Quorums the blob is dispersed into. An attestation must cover all of
    /// them for the blob to complete.
    pub quorums: Vec<QuorumId>,
    /// Erasure-coding commitments produced by the encoder. Opaque bytes.
    pub commitment: Vec<u8>,
    pub payment: PaymentMetadata,
}

impl BlobHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("failed to serialize blob header")
    }

    pub fn blob_key(&self) -> BlobKey {
        BlobKey(keccak256(&self.to_bytes()))
    }
}

/// A blob header together with its relay assignment and the client signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCertificate {
    pub blob_header: BlobHeader,
    /// Relays from which the blob payload can be fetched, in priority order.
    pub relay_keys: Vec<u16>,
    pub signature: Option<Vec<u8>>,
}

impl BlobCertificate {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("failed to serialize blob certificate")
    }

    /// Deterministic hash over all certificate fields; the Merkle leaf of the
    /// blob inside a batch.
    pub fn hash(&self) -> [u8; 32] {
        keccak256(&self.to_bytes())
    }
}

/// Dispatch lifecycle of a blob.
///
/// `Complete` and `Failed` are terminal. Only `Encoded` blobs are eligible
/// for batching; `GatheringSignatures` marks that a batch has claimed the
/// blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobStatus {
    Queued,
    Encoded,
    GatheringSignatures,
    Complete,
    Failed,
}

impl BlobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Encoded)
                | (Self::Encoded, Self::GatheringSignatures)
                | (Self::GatheringSignatures, Self::Complete)
                | (Self::GatheringSignatures, Self::Failed)
        )
    }
}

/// Mutable per-blob record tracked by the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub blob_header: BlobHeader,
    pub status: BlobStatus,
    /// Nanosecond timestamp after which the record may be garbage-collected.
    pub expiry_ns: u64,
    /// Retries performed by the ingestion path, not by the dispatcher.
    pub num_retries: u32,
    /// Monotonic nanosecond timestamp used as the dispatcher cursor key.
    pub updated_at_ns: u64,
}
