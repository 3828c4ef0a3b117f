//! Definitions of the Lumen network's domain objects: blobs, batches,
//! attestations, and operator-set snapshots.

pub use lumen_basic_types::{BlobKey, L1BlockNumber, OperatorId, QuorumId, StakeAmount};

pub mod attestation;
pub mod batch;
pub mod blob;
pub mod operator;

pub use self::{
    attestation::Attestation,
    batch::{Batch, BatchData, BatchHeader, BlobChunks, BlobInclusionInfo, ChunkAssignment},
    blob::{BlobCertificate, BlobHeader, BlobMetadata, BlobStatus, PaymentMetadata},
    operator::{OperatorInfo, OperatorState},
};
