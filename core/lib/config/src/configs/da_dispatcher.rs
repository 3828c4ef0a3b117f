use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

pub const DEFAULT_ATTESTATION_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BATCH_ATTESTATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SIGNATURE_TICK_INTERVAL_MS: u64 = 100;
pub const DEFAULT_NUM_REQUEST_RETRIES: u32 = 3;
pub const DEFAULT_MAX_BATCH_SIZE: i32 = 128;
/// Confirmation threshold applied to every quorum without an explicit
/// override, in percent of the quorum's total stake.
pub const DEFAULT_CONFIRMATION_THRESHOLD_PERCENT: u8 = 55;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaDispatcherConfig {
    /// Tick period of the dispatcher loop (milliseconds).
    pub pull_interval_ms: u64,
    /// How far behind the current block the batch reference block lags.
    pub finalization_block_delay: u64,
    /// Per-operator `StoreChunks` deadline (seconds).
    pub attestation_timeout_secs: Option<u64>,
    /// Overall signature-collection deadline per batch (seconds). Must be at
    /// least the per-operator timeout.
    pub batch_attestation_timeout_secs: Option<u64>,
    /// Poll granularity of signature collection (milliseconds).
    pub signature_tick_interval_ms: Option<u64>,
    /// Retry budget per operator request and per store write.
    pub num_request_retries: Option<u32>,
    /// Upper bound on certificates per batch.
    pub max_batch_size: Option<i32>,
    /// Bound on concurrent operator requests. Defaults to the available
    /// parallelism of the host.
    pub node_request_concurrency: Option<usize>,
    /// Per-quorum confirmation threshold overrides (percent).
    #[serde(default)]
    pub confirmation_thresholds: HashMap<u8, u8>,
}

impl DaDispatcherConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }

    pub fn attestation_timeout(&self) -> Duration {
        Duration::from_secs(
            self.attestation_timeout_secs
                .unwrap_or(DEFAULT_ATTESTATION_TIMEOUT_SECS),
        )
    }

    pub fn batch_attestation_timeout(&self) -> Duration {
        Duration::from_secs(
            self.batch_attestation_timeout_secs
                .unwrap_or(DEFAULT_BATCH_ATTESTATION_TIMEOUT_SECS),
        )
    }

    pub fn signature_tick_interval(&self) -> Duration {
        Duration::from_millis(
            self.signature_tick_interval_ms
                .unwrap_or(DEFAULT_SIGNATURE_TICK_INTERVAL_MS),
        )
    }

    pub fn num_request_retries(&self) -> u32 {
        self.num_request_retries
            .unwrap_or(DEFAULT_NUM_REQUEST_RETRIES)
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE).max(1) as usize
    }

    pub fn node_request_concurrency(&self) -> usize {
        self.node_request_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(8, usize::from)
        })
    }

    /// Confirmation threshold for `quorum`, in percent.
    pub fn confirmation_threshold(&self, quorum: lumen_basic_types::QuorumId) -> u8 {
        self.confirmation_thresholds
            .get(&quorum.0)
            .copied()
            .unwrap_or(DEFAULT_CONFIRMATION_THRESHOLD_PERCENT)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.pull_interval_ms > 0, "pull_interval_ms must be positive");
        anyhow::ensure!(
            self.max_batch_size.map_or(true, |size| size > 0),
            "max_batch_size must be positive"
        );
        anyhow::ensure!(
            self.batch_attestation_timeout() >= self.attestation_timeout(),
            "batch_attestation_timeout must be at least attestation_timeout"
        );
        Ok(())
    }

    // Creates a config object suitable for use in unit tests.
    pub fn for_tests() -> Self {
        Self {
            pull_interval_ms: 100,
            finalization_block_delay: 10,
            attestation_timeout_secs: Some(1),
            batch_attestation_timeout_secs: Some(2),
            signature_tick_interval_ms: Some(10),
            num_request_retries: Some(2),
            max_batch_size: Some(32),
            node_request_concurrency: Some(4),
            confirmation_thresholds: HashMap::new(),
        }
    }
}
