//! Seams to the collaborators the dispatcher does not own.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use lumen_basic_types::{BlobKey, L1BlockNumber};
use lumen_types::OperatorState;

/// Read-only view of the chain: operator sets, stakes, sockets and BLS keys
/// indexed by block number.
#[async_trait]
pub trait ChainStateReader: fmt::Debug + Send + Sync {
    /// Latest finalized block.
    async fn get_current_block(&self) -> anyhow::Result<L1BlockNumber>;

    /// Operator-set snapshot at `block`. A pure function of the block
    /// height, so implementations are free to cache.
    async fn get_operator_state(&self, block: L1BlockNumber)
        -> anyhow::Result<Arc<OperatorState>>;
}

/// Hook invoked once per blob key when the key leaves the `Encoded` state.
/// Upstream stages use it to drop their own tracking entries. Errors are
/// logged and never abort the batch.
pub type BeforeDispatchHook = Arc<dyn Fn(BlobKey) -> anyhow::Result<()> + Send + Sync>;
