use std::time::Duration;

use vise::{Buckets, Counter, Gauge, Histogram, Metrics, Unit};

/// Buckets for dispatch and collection latencies (10 ms to 60 seconds).
const LATENCIES: Buckets =
    Buckets::values(&[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);

#[derive(Debug, Metrics)]
#[metrics(prefix = "lumen_da_dispatcher")]
pub(crate) struct DaDispatcherMetrics {
    /// Time spent building one batch, Merkle tree included.
    #[metrics(buckets = LATENCIES, unit = Unit::Seconds)]
    pub batch_build_latency: Histogram<Duration>,
    /// End-to-end latency of one `StoreChunks` call, retries included.
    #[metrics(buckets = LATENCIES, unit = Unit::Seconds)]
    pub store_chunks_latency: Histogram<Duration>,
    /// Time between opening the signature channel and finalizing the
    /// attestation.
    #[metrics(buckets = LATENCIES, unit = Unit::Seconds)]
    pub signature_collection_latency: Histogram<Duration>,
    /// Attempts used per `StoreChunks` call.
    #[metrics(buckets = Buckets::linear(0.0..=10.0, 1.0))]
    pub store_chunks_attempts: Histogram<usize>,
    /// Certificates per dispatched batch.
    #[metrics(buckets = Buckets::exponential(1.0..=1_024.0, 2.0))]
    pub batch_size: Histogram<usize>,
    /// Reference block of the last dispatched batch.
    pub last_reference_block: Gauge<usize>,
    /// Valid signatures accepted by the aggregator.
    pub signatures_accepted: Counter,
    /// Operators that terminally failed to return a signature.
    pub operators_nonsigning: Counter,
    /// Blobs that reached `Complete`.
    pub blobs_complete: Counter,
    /// Blobs that reached `Failed`.
    pub blobs_failed: Counter,
    /// Dispatcher tick errors.
    pub errors: Counter,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<DaDispatcherMetrics> = vise::Global::new();
