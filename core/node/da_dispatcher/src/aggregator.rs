//! Stake-weighted aggregation of operator signatures for one batch.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use lumen_basic_types::{OperatorId, QuorumId, StakeAmount};
use lumen_bls::{PublicKeyG1, PublicKeyG2, Signature};
use lumen_types::{Attestation, BatchHeader, OperatorState};

use crate::metrics::METRICS;

/// Per-quorum confirmation thresholds, in percent of total stake.
pub type QuorumThresholds = HashMap<QuorumId, u8>;

/// Accumulates verified operator signatures over one batch header and
/// produces the aggregated attestation.
///
/// Invalid signatures, unknown operators and duplicate submissions are
/// discarded silently; the aggregator only ever grows its signer set.
#[derive(Debug)]
pub struct SignatureAggregator {
    batch_header: BatchHeader,
    batch_header_hash: [u8; 32],
    operator_state: Arc<OperatorState>,
    /// Quorum union of the batch.
    quorums: BTreeSet<QuorumId>,
    /// Verified signatures in deterministic operator order.
    signatures: BTreeMap<OperatorId, Signature>,
    signed_stake: HashMap<QuorumId, StakeAmount>,
}

impl SignatureAggregator {
    pub fn new(
        batch_header: BatchHeader,
        operator_state: Arc<OperatorState>,
        quorums: BTreeSet<QuorumId>,
    ) -> Self {
        let signed_stake = quorums.iter().map(|quorum| (*quorum, 0)).collect();
        Self {
            batch_header_hash: batch_header.hash(),
            batch_header,
            operator_state,
            quorums,
            signatures: BTreeMap::new(),
            signed_stake,
        }
    }

    /// Feeds one operator signature into the aggregate. Returns whether the
    /// signature was accepted.
    pub fn observe(&mut self, operator_id: OperatorId, signature: Signature) -> bool {
        if self.signatures.contains_key(&operator_id) {
            tracing::debug!("Discarding duplicate signature from operator {operator_id}");
            return false;
        }

        let member_quorums = self.operator_state.quorums_of(&operator_id, &self.quorums);
        let Some(info) = member_quorums.first().and_then(|quorum| {
            self.operator_state
                .quorum_members(*quorum)
                .and_then(|members| members.get(&operator_id))
        }) else {
            tracing::debug!("Discarding signature from unknown operator {operator_id}");
            return false;
        };

        if !signature.verify(&self.batch_header_hash, &info.public_key_g2) {
            tracing::debug!("Discarding invalid signature from operator {operator_id}");
            return false;
        }

        for quorum in &member_quorums {
            let stake = self.operator_state.stake(*quorum, &operator_id);
            *self.signed_stake.entry(*quorum).or_insert(0) += stake;
        }
        self.signatures.insert(operator_id, signature);
        METRICS.signatures_accepted.inc();
        true
    }

    /// Whether every quorum of the batch already meets its threshold, i.e.
    /// collection may terminate early.
    pub fn is_satisfied(&self, thresholds: &QuorumThresholds) -> bool {
        self.quorums
            .iter()
            .all(|quorum| self.quorum_attested(*quorum, thresholds))
    }

    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }

    fn quorum_attested(&self, quorum: QuorumId, thresholds: &QuorumThresholds) -> bool {
        let total = self.operator_state.total_stake(quorum);
        if total == 0 {
            return false;
        }
        let signed = self.signed_stake.get(&quorum).copied().unwrap_or(0);
        let threshold = thresholds.get(&quorum).copied().unwrap_or(100);
        signed.saturating_mul(100) >= (threshold as StakeAmount).saturating_mul(total)
    }

    fn signed_percent(&self, quorum: QuorumId) -> u8 {
        let total = self.operator_state.total_stake(quorum);
        if total == 0 {
            return 0;
        }
        let signed = self.signed_stake.get(&quorum).copied().unwrap_or(0);
        (signed.saturating_mul(100) / total) as u8
    }

    /// Terminates aggregation and produces the attestation. Total silence
    /// (zero valid signatures) yields the empty attestation, which is still
    /// persisted so that the failure stays auditable; partial collection
    /// below every threshold keeps the signer and non-signer accounting.
    pub fn finalize(self, thresholds: &QuorumThresholds, attested_at_ns: u64) -> Attestation {
        if self.signatures.is_empty() {
            return Attestation::empty(self.batch_header, attested_at_ns);
        }

        let quorum_numbers: Vec<QuorumId> = self
            .quorums
            .iter()
            .copied()
            .filter(|quorum| self.quorum_attested(*quorum, thresholds))
            .collect();

        let quorum_results: HashMap<QuorumId, u8> = self
            .quorums
            .iter()
            .map(|quorum| (*quorum, self.signed_percent(*quorum)))
            .collect();

        let sigma = Signature::aggregate(self.signatures.values());

        let signer_g2_keys: Vec<PublicKeyG2> = self
            .signatures
            .keys()
            .filter_map(|id| self.operator_info(id).map(|info| info.public_key_g2))
            .collect();
        let apk_g2 = PublicKeyG2::aggregate(&signer_g2_keys);

        let mut quorum_apks = HashMap::new();
        for quorum in &self.quorums {
            let keys: Vec<PublicKeyG1> = self
                .signatures
                .keys()
                .filter(|id| {
                    self.operator_state
                        .quorum_members(*quorum)
                        .is_some_and(|members| members.contains_key(*id))
                })
                .filter_map(|id| self.operator_info(id).map(|info| info.public_key_g1))
                .collect();
            if let Some(apk) = PublicKeyG1::aggregate(&keys) {
                quorum_apks.insert(*quorum, apk);
            }
        }

        let non_signer_pubkeys: Vec<PublicKeyG1> = self
            .operator_state
            .committee(&self.quorums)
            .into_iter()
            .filter(|(id, _)| !self.signatures.contains_key(id))
            .map(|(_, info)| info.public_key_g1)
            .collect();

        Attestation {
            batch_header: self.batch_header,
            attested_at_ns,
            non_signer_pubkeys,
            apk_g2,
            quorum_apks,
            sigma,
            quorum_numbers,
            quorum_results,
        }
    }

    fn operator_info(&self, operator_id: &OperatorId) -> Option<&lumen_types::OperatorInfo> {
        self.quorums.iter().find_map(|quorum| {
            self.operator_state
                .quorum_members(*quorum)
                .and_then(|members| members.get(operator_id))
        })
    }
}
