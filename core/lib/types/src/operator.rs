//! Snapshot of the operator set at a reference block.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use lumen_basic_types::{L1BlockNumber, OperatorId, QuorumId, StakeAmount};
use lumen_bls::{PublicKeyG1, PublicKeyG2};

/// Per-quorum registration of one operator.
#[derive(Debug, Clone)]
pub struct OperatorInfo {
    pub stake: StakeAmount,
    pub public_key_g1: PublicKeyG1,
    pub public_key_g2: PublicKeyG2,
    /// Dispersal endpoint the operator serves `StoreChunks` on.
    pub socket: String,
}

/// Operator set, stakes, sockets and BLS keys indexed by quorum, as read
/// from the chain at one block. Immutable after construction.
#[derive(Debug, Clone)]
pub struct OperatorState {
    operators: HashMap<QuorumId, HashMap<OperatorId, OperatorInfo>>,
    totals: HashMap<QuorumId, StakeAmount>,
    block_number: L1BlockNumber,
}

impl OperatorState {
    pub fn new(
        operators: HashMap<QuorumId, HashMap<OperatorId, OperatorInfo>>,
        block_number: L1BlockNumber,
    ) -> Self {
        let totals = operators
            .iter()
            .map(|(quorum, members)| {
                let total = members.values().map(|info| info.stake).sum();
                (*quorum, total)
            })
            .collect();
        Self {
            operators,
            totals,
            block_number,
        }
    }

    pub fn block_number(&self) -> L1BlockNumber {
        self.block_number
    }

    pub fn quorum_members(&self, quorum: QuorumId) -> Option<&HashMap<OperatorId, OperatorInfo>> {
        self.operators.get(&quorum)
    }

    pub fn total_stake(&self, quorum: QuorumId) -> StakeAmount {
        self.totals.get(&quorum).copied().unwrap_or(0)
    }

    /// Stake of `operator` in `quorum`, zero if not registered there.
    pub fn stake(&self, quorum: QuorumId, operator: &OperatorId) -> StakeAmount {
        self.operators
            .get(&quorum)
            .and_then(|members| members.get(operator))
            .map_or(0, |info| info.stake)
    }

    /// Committee for a set of quorums: the union of their members, in
    /// deterministic operator-id order. For operators registered in several
    /// quorums an arbitrary registration supplies the socket and keys; they
    /// are identical across quorums by construction of the chain state.
    pub fn committee(&self, quorums: &BTreeSet<QuorumId>) -> BTreeMap<OperatorId, &OperatorInfo> {
        let mut committee = BTreeMap::new();
        for quorum in quorums {
            if let Some(members) = self.operators.get(quorum) {
                for (id, info) in members {
                    committee.entry(*id).or_insert(info);
                }
            }
        }
        committee
    }

    /// Quorums from `quorums` the operator is registered in.
    pub fn quorums_of(&self, operator: &OperatorId, quorums: &BTreeSet<QuorumId>) -> BTreeSet<QuorumId> {
        quorums
            .iter()
            .copied()
            .filter(|quorum| {
                self.operators
                    .get(quorum)
                    .is_some_and(|members| members.contains_key(operator))
            })
            .collect()
    }
}
