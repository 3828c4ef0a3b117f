//! Storage interface of the disperser control plane.
//!
//! The metadata store is an external collaborator; this crate pins down the
//! contract the dispatcher relies on and ships [`MemoryBlobMetadataStore`],
//! an in-memory reference implementation of that contract used in tests and
//! local runs.

use std::fmt;

use async_trait::async_trait;
use lumen_basic_types::BlobKey;
use lumen_types::{Attestation, BatchHeader, BlobCertificate, BlobInclusionInfo, BlobMetadata, BlobStatus};

mod memory;

pub use self::memory::MemoryBlobMetadataStore;

#[derive(Debug, thiserror::Error)]
pub enum DalError {
    #[error("row not found")]
    NotFound,
    /// A keyed write carried a payload different from the one already stored
    /// under the same key. Callers treat this as success only after a re-read
    /// confirms the stored value matches what they meant to write.
    #[error("conflicting write for {0}")]
    Conflict(String),
    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: BlobStatus, to: BlobStatus },
    #[error("transient store error: {0}")]
    Transient(#[from] anyhow::Error),
}

impl DalError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type DalResult<T> = Result<T, DalError>;

/// Pagination cursor over the `Encoded` queue; rows are ordered by
/// `(updated_at_ns, blob_key)` ascending and a fetch returns rows strictly
/// after the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub updated_at_ns: u64,
    pub blob_key: BlobKey,
}

/// One page of the `Encoded` queue. `next_cursor` points at the last
/// returned row; a page shorter than the requested limit means the sweep
/// reached the end of the queue.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub blobs: Vec<(BlobKey, BlobMetadata)>,
    pub next_cursor: Option<Cursor>,
}

/// Contract between the dispatcher and the blob metadata store.
///
/// All writes are idempotent on their primary keys, and status updates
/// enforce the blob state machine; see the method docs. Implementations must
/// be internally thread-safe.
#[async_trait]
pub trait BlobMetadataStore: fmt::Debug + Send + Sync {
    /// Returns at most `limit` blobs in `Encoded` status strictly after
    /// `cursor`, ordered by `(updated_at_ns, blob_key)`. The ordering must be
    /// monotone in `updated_at_ns` so a cursor sweep cannot skip rows.
    async fn fetch_encoded(&self, cursor: Option<Cursor>, limit: usize) -> DalResult<EncodedPage>;

    async fn get_blob_metadata(&self, blob_key: BlobKey) -> DalResult<BlobMetadata>;

    async fn get_certificate(&self, blob_key: BlobKey) -> DalResult<BlobCertificate>;

    /// Applies a status transition, rejecting edges outside the blob state
    /// machine with [`DalError::IllegalTransition`]. Bumps `updated_at_ns`.
    async fn update_blob_status(&self, blob_key: BlobKey, status: BlobStatus) -> DalResult<()>;

    async fn put_batch_header(
        &self,
        batch_header_hash: [u8; 32],
        header: &BatchHeader,
    ) -> DalResult<()>;

    async fn get_batch_header(&self, batch_header_hash: [u8; 32]) -> DalResult<BatchHeader>;

    /// Keyed by `(blob_key, batch_header_hash)`.
    async fn put_inclusion_info(&self, info: &BlobInclusionInfo) -> DalResult<()>;

    async fn get_inclusion_info(
        &self,
        blob_key: BlobKey,
        batch_header_hash: [u8; 32],
    ) -> DalResult<BlobInclusionInfo>;

    /// First write wins: re-running a batch produces an attestation with a
    /// later `attested_at_ns`, and the original row stays authoritative.
    async fn put_attestation(
        &self,
        batch_header_hash: [u8; 32],
        attestation: &Attestation,
    ) -> DalResult<()>;

    async fn get_attestation(&self, batch_header_hash: [u8; 32]) -> DalResult<Attestation>;
}
