//! Batch-level types: the header operators sign, inclusion proofs, and the
//! per-operator chunk assignment forwarded on dispersal.

use std::{collections::BTreeSet, sync::Arc};

use lumen_basic_types::{BlobKey, L1BlockNumber, QuorumId};
use lumen_bls::keccak256;
use serde::{Deserialize, Serialize};

use crate::{blob::BlobCertificate, operator::OperatorState};

/// Identity of a batch and the message operators sign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    /// Root of the Merkle tree over certificate hashes, in selection order.
    pub batch_root: [u8; 32],
    /// Block height at which the operator set was snapshotted.
    pub reference_block: L1BlockNumber,
}

impl BatchHeader {
    /// Canonical batch header hash: keccak256 over the root followed by the
    /// big-endian reference block number.
    pub fn hash(&self) -> [u8; 32] {
        let mut preimage = [0u8; 40];
        preimage[..32].copy_from_slice(&self.batch_root);
        preimage[32..].copy_from_slice(&self.reference_block.0.to_be_bytes());
        keccak256(&preimage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub header: BatchHeader,
    pub certificates: Vec<BlobCertificate>,
}

/// Everything the fan-out and collection stages need about one batch.
#[derive(Debug, Clone)]
pub struct BatchData {
    pub batch: Batch,
    pub batch_header_hash: [u8; 32],
    /// Keys of the batched blobs, index-aligned with `batch.certificates`.
    pub blob_keys: Vec<BlobKey>,
    /// Merkle proofs of the batched certificates, index-aligned with
    /// `batch.certificates`.
    pub inclusion_infos: Vec<BlobInclusionInfo>,
    /// Operator-set snapshot at the batch's reference block.
    pub operator_state: Arc<OperatorState>,
}

impl BatchData {
    /// Union of the quorums referenced by the batch's certificates.
    pub fn quorums(&self) -> BTreeSet<QuorumId> {
        self.batch
            .certificates
            .iter()
            .flat_map(|certificate| certificate.blob_header.quorums.iter().copied())
            .collect()
    }
}

/// Merkle proof tying one blob certificate to a batch root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobInclusionInfo {
    pub blob_key: BlobKey,
    pub batch_header: BatchHeader,
    /// Leaf index of the certificate inside the batch; contiguous `[0, N)`.
    pub blob_index: u32,
    pub inclusion_proof: Vec<[u8; 32]>,
}

/// Chunks of one blob an operator must store, identified by the quorums the
/// operator serves for that blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobChunks {
    pub blob_key: BlobKey,
    pub quorums: Vec<QuorumId>,
}

/// Per-operator storage assignment for one batch. The actual chunk index
/// calculation is the encoder's concern; the dispatcher forwards the
/// assignment as computed from quorum membership.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    pub blobs: Vec<BlobChunks>,
}

impl ChunkAssignment {
    /// Assignment of `batch` for an operator serving `operator_quorums`:
    /// every certificate whose quorum set intersects the operator's, with
    /// the intersection recorded.
    pub fn for_operator(batch: &Batch, operator_quorums: &BTreeSet<QuorumId>) -> Self {
        let blobs = batch
            .certificates
            .iter()
            .filter_map(|certificate| {
                let quorums: Vec<QuorumId> = certificate
                    .blob_header
                    .quorums
                    .iter()
                    .copied()
                    .filter(|quorum| operator_quorums.contains(quorum))
                    .collect();
                (!quorums.is_empty()).then(|| BlobChunks {
                    blob_key: certificate.blob_header.blob_key(),
                    quorums,
                })
            })
            .collect();
        Self { blobs }
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobHeader;

    fn certificate(quorums: Vec<QuorumId>) -> BlobCertificate {
        BlobCertificate {
            blob_header: BlobHeader {
                quorums,
                ..BlobHeader::default()
            },
            relay_keys: vec![],
            signature: None,
        }
    }

    #[test]
    fn header_hash_is_sensitive_to_both_fields() {
        let header = BatchHeader {
            batch_root: [1; 32],
            reference_block: L1BlockNumber(10),
        };
        let other_root = BatchHeader {
            batch_root: [2; 32],
            ..header
        };
        let other_block = BatchHeader {
            reference_block: L1BlockNumber(11),
            ..header
        };
        assert_ne!(header.hash(), other_root.hash());
        assert_ne!(header.hash(), other_block.hash());
        assert_eq!(header.hash(), header.hash());
    }

    #[test]
    fn assignment_filters_by_quorum_membership() {
        let batch = Batch {
            header: BatchHeader::default(),
            certificates: vec![
                certificate(vec![QuorumId(0), QuorumId(1)]),
                certificate(vec![QuorumId(1)]),
                certificate(vec![QuorumId(2)]),
            ],
        };

        let quorums: BTreeSet<_> = [QuorumId(1)].into_iter().collect();
        let assignment = ChunkAssignment::for_operator(&batch, &quorums);

        assert_eq!(assignment.blobs.len(), 2);
        assert_eq!(assignment.blobs[0].quorums, vec![QuorumId(1)]);
        assert_eq!(assignment.blobs[1].quorums, vec![QuorumId(1)]);

        let quorums: BTreeSet<_> = [QuorumId(3)].into_iter().collect();
        assert!(ChunkAssignment::for_operator(&batch, &quorums).is_empty());
    }
}
