//! The aggregated attestation persisted per batch.

use std::collections::HashMap;

use lumen_basic_types::QuorumId;
use lumen_bls::{PublicKeyG1, PublicKeyG2, Signature};
use serde::{Deserialize, Serialize};

use crate::batch::BatchHeader;

/// Aggregated BLS multi-signature plus quorum accounting for one batch.
///
/// An *empty* attestation (all collections empty, `sigma` and `apk_g2`
/// absent) records that signature collection ran and no quorum reached its
/// threshold; it is persisted all the same so the failure is auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub batch_header: BatchHeader,
    /// Nanosecond timestamp at which aggregation was finalized.
    pub attested_at_ns: u64,
    /// G1 public keys of committee members that did not sign.
    pub non_signer_pubkeys: Vec<PublicKeyG1>,
    /// Aggregate G2 public key of the signers.
    pub apk_g2: Option<PublicKeyG2>,
    /// Per-quorum aggregate G1 public key of the signers.
    pub quorum_apks: HashMap<QuorumId, PublicKeyG1>,
    /// Aggregated signature over the batch header hash.
    pub sigma: Option<Signature>,
    /// Quorums whose signed stake reached the confirmation threshold.
    pub quorum_numbers: Vec<QuorumId>,
    /// Signed stake per quorum, as an integer percentage in `[0, 100]`,
    /// over the batch's whole quorum union.
    pub quorum_results: HashMap<QuorumId, u8>,
}

impl Attestation {
    /// An attestation recording total collection failure for `batch_header`.
    pub fn empty(batch_header: BatchHeader, attested_at_ns: u64) -> Self {
        Self {
            batch_header,
            attested_at_ns,
            non_signer_pubkeys: Vec::new(),
            apk_g2: None,
            quorum_apks: HashMap::new(),
            sigma: None,
            quorum_numbers: Vec::new(),
            quorum_results: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sigma.is_none() && self.quorum_numbers.is_empty()
    }

    /// Whether every quorum in `quorums` reached its threshold. This is the
    /// per-blob completion rule: a blob completes iff its quorum set is
    /// covered by the attested quorums.
    pub fn covers(&self, quorums: &[QuorumId]) -> bool {
        quorums
            .iter()
            .all(|quorum| self.quorum_numbers.contains(quorum))
    }
}
