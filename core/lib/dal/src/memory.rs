//! In-memory reference implementation of the metadata store contract.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use lumen_basic_types::{time::nanos_since_epoch, BlobKey};
use lumen_types::{
    Attestation, BatchHeader, BlobCertificate, BlobInclusionInfo, BlobMetadata, BlobStatus,
};

use crate::{BlobMetadataStore, Cursor, DalError, DalResult, EncodedPage};

#[derive(Debug, Clone)]
struct BlobRecord {
    metadata: BlobMetadata,
    certificate: BlobCertificate,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<BlobKey, BlobRecord>,
    batch_headers: HashMap<[u8; 32], BatchHeader>,
    inclusion_infos: HashMap<(BlobKey, [u8; 32]), BlobInclusionInfo>,
    attestations: HashMap<[u8; 32], Attestation>,
    /// Blobs whose certificate was dropped via [`MemoryBlobMetadataStore::remove_certificate`].
    missing_certificates: HashSet<BlobKey>,
    /// Strictly increasing `updated_at_ns` source.
    clock_ns: u64,
}

impl Inner {
    fn next_timestamp(&mut self) -> u64 {
        self.clock_ns = self.clock_ns.max(nanos_since_epoch()) + 1;
        self.clock_ns
    }
}

/// Thread-safe in-memory metadata store. Implements the full store contract,
/// including idempotent keyed puts and state-machine enforcement, plus
/// seeding helpers standing in for the ingestion path.
#[derive(Debug, Default)]
pub struct MemoryBlobMetadataStore {
    inner: Mutex<Inner>,
    /// When non-zero, the next writes fail with a transient error. Lets
    /// tests exercise the callers' retry paths.
    fail_writes: AtomicU32,
}

impl MemoryBlobMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an `Encoded` blob, assigning the next cursor timestamp.
    /// Returns the blob key.
    pub fn insert_blob(&self, certificate: BlobCertificate, expiry_ns: u64) -> BlobKey {
        let mut inner = self.inner.lock().unwrap();
        let updated_at_ns = inner.next_timestamp();
        Self::insert_at(&mut inner, certificate, expiry_ns, updated_at_ns)
    }

    /// Seeds an `Encoded` blob with an explicit `updated_at_ns`, e.g. one
    /// older than rows the dispatcher has already swept past.
    pub fn insert_blob_at(
        &self,
        certificate: BlobCertificate,
        expiry_ns: u64,
        updated_at_ns: u64,
    ) -> BlobKey {
        let mut inner = self.inner.lock().unwrap();
        Self::insert_at(&mut inner, certificate, expiry_ns, updated_at_ns)
    }

    fn insert_at(
        inner: &mut Inner,
        certificate: BlobCertificate,
        expiry_ns: u64,
        updated_at_ns: u64,
    ) -> BlobKey {
        let blob_key = certificate.blob_header.blob_key();
        let metadata = BlobMetadata {
            blob_header: certificate.blob_header.clone(),
            status: BlobStatus::Encoded,
            expiry_ns,
            num_retries: 0,
            updated_at_ns,
        };
        inner.blobs.insert(
            blob_key,
            BlobRecord {
                metadata,
                certificate,
            },
        );
        blob_key
    }

    /// Makes the next `count` writes fail with a transient error.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Drops the certificate of a blob while keeping its metadata row,
    /// simulating a store that lost the invariant between the two.
    pub fn remove_certificate(&self, blob_key: &BlobKey) {
        let mut inner = self.inner.lock().unwrap();
        inner.missing_certificates.insert(*blob_key);
    }

    fn check_write_fault(&self) -> DalResult<()> {
        let mut remaining = self.fail_writes.load(Ordering::SeqCst);
        loop {
            if remaining == 0 {
                return Ok(());
            }
            match self.fail_writes.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(DalError::Transient(anyhow::anyhow!("injected write fault"))),
                Err(actual) => remaining = actual,
            }
        }
    }

    fn put_keyed<K, V>(
        map: &mut HashMap<K, V>,
        key: K,
        value: V,
        describe: impl FnOnce() -> String,
    ) -> DalResult<()>
    where
        K: std::hash::Hash + Eq,
        V: PartialEq,
    {
        match map.get(&key) {
            None => {
                map.insert(key, value);
                Ok(())
            }
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(DalError::Conflict(describe())),
        }
    }
}

#[async_trait]
impl BlobMetadataStore for MemoryBlobMetadataStore {
    async fn fetch_encoded(&self, cursor: Option<Cursor>, limit: usize) -> DalResult<EncodedPage> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<(BlobKey, BlobMetadata)> = inner
            .blobs
            .iter()
            .filter(|(_, record)| record.metadata.status == BlobStatus::Encoded)
            .filter(|(blob_key, record)| match &cursor {
                Some(cursor) => {
                    (record.metadata.updated_at_ns, **blob_key)
                        > (cursor.updated_at_ns, cursor.blob_key)
                }
                None => true,
            })
            .map(|(blob_key, record)| (*blob_key, record.metadata.clone()))
            .collect();
        rows.sort_by_key(|(blob_key, metadata)| (metadata.updated_at_ns, *blob_key));
        rows.truncate(limit);

        let next_cursor = rows.last().map(|(blob_key, metadata)| Cursor {
            updated_at_ns: metadata.updated_at_ns,
            blob_key: *blob_key,
        });
        Ok(EncodedPage {
            blobs: rows,
            next_cursor,
        })
    }

    async fn get_blob_metadata(&self, blob_key: BlobKey) -> DalResult<BlobMetadata> {
        let inner = self.inner.lock().unwrap();
        inner
            .blobs
            .get(&blob_key)
            .map(|record| record.metadata.clone())
            .ok_or(DalError::NotFound)
    }

    async fn get_certificate(&self, blob_key: BlobKey) -> DalResult<BlobCertificate> {
        let inner = self.inner.lock().unwrap();
        if inner.missing_certificates.contains(&blob_key) {
            return Err(DalError::NotFound);
        }
        inner
            .blobs
            .get(&blob_key)
            .map(|record| record.certificate.clone())
            .ok_or(DalError::NotFound)
    }

    async fn update_blob_status(&self, blob_key: BlobKey, status: BlobStatus) -> DalResult<()> {
        self.check_write_fault()?;
        let mut inner = self.inner.lock().unwrap();
        let updated_at_ns = inner.next_timestamp();
        let record = inner.blobs.get_mut(&blob_key).ok_or(DalError::NotFound)?;
        if !record.metadata.status.can_transition_to(status) {
            return Err(DalError::IllegalTransition {
                from: record.metadata.status,
                to: status,
            });
        }
        record.metadata.status = status;
        record.metadata.updated_at_ns = updated_at_ns;
        Ok(())
    }

    async fn put_batch_header(
        &self,
        batch_header_hash: [u8; 32],
        header: &BatchHeader,
    ) -> DalResult<()> {
        self.check_write_fault()?;
        let mut inner = self.inner.lock().unwrap();
        Self::put_keyed(&mut inner.batch_headers, batch_header_hash, *header, || {
            format!("batch header {}", hex_fmt(&batch_header_hash))
        })
    }

    async fn get_batch_header(&self, batch_header_hash: [u8; 32]) -> DalResult<BatchHeader> {
        let inner = self.inner.lock().unwrap();
        inner
            .batch_headers
            .get(&batch_header_hash)
            .copied()
            .ok_or(DalError::NotFound)
    }

    async fn put_inclusion_info(&self, info: &BlobInclusionInfo) -> DalResult<()> {
        self.check_write_fault()?;
        let mut inner = self.inner.lock().unwrap();
        let key = (info.blob_key, info.batch_header.hash());
        Self::put_keyed(&mut inner.inclusion_infos, key, info.clone(), || {
            format!("inclusion info for blob {}", info.blob_key)
        })
    }

    async fn get_inclusion_info(
        &self,
        blob_key: BlobKey,
        batch_header_hash: [u8; 32],
    ) -> DalResult<BlobInclusionInfo> {
        let inner = self.inner.lock().unwrap();
        inner
            .inclusion_infos
            .get(&(blob_key, batch_header_hash))
            .cloned()
            .ok_or(DalError::NotFound)
    }

    async fn put_attestation(
        &self,
        batch_header_hash: [u8; 32],
        attestation: &Attestation,
    ) -> DalResult<()> {
        self.check_write_fault()?;
        let mut inner = self.inner.lock().unwrap();
        // First write wins: a re-run of the same batch finalizes at a later
        // timestamp, and the originally persisted attestation stays
        // authoritative.
        inner
            .attestations
            .entry(batch_header_hash)
            .or_insert_with(|| attestation.clone());
        Ok(())
    }

    async fn get_attestation(&self, batch_header_hash: [u8; 32]) -> DalResult<Attestation> {
        let inner = self.inner.lock().unwrap();
        inner
            .attestations
            .get(&batch_header_hash)
            .cloned()
            .ok_or(DalError::NotFound)
    }
}

fn hex_fmt(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use lumen_types::BlobHeader;

    use super::*;

    fn certificate(tag: u8) -> BlobCertificate {
        BlobCertificate {
            blob_header: BlobHeader {
                version: 0,
                quorums: vec![],
                commitment: vec![tag],
                payment: Default::default(),
            },
            relay_keys: vec![],
            signature: None,
        }
    }

    #[tokio::test]
    async fn fetch_encoded_pages_in_cursor_order() {
        let store = MemoryBlobMetadataStore::new();
        let keys: Vec<BlobKey> = (0..5).map(|i| store.insert_blob(certificate(i), 0)).collect();

        let page = store.fetch_encoded(None, 3).await.unwrap();
        assert_eq!(
            page.blobs.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
            keys[..3]
        );

        let page = store.fetch_encoded(page.next_cursor, 3).await.unwrap();
        assert_eq!(
            page.blobs.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
            keys[3..]
        );
        // Partial page: the sweep reached the end.
        assert_eq!(page.blobs.len(), 2);
    }

    #[tokio::test]
    async fn fetch_encoded_skips_claimed_blobs() {
        let store = MemoryBlobMetadataStore::new();
        let key = store.insert_blob(certificate(0), 0);
        store
            .update_blob_status(key, BlobStatus::GatheringSignatures)
            .await
            .unwrap();
        let page = store.fetch_encoded(None, 10).await.unwrap();
        assert!(page.blobs.is_empty());
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let store = MemoryBlobMetadataStore::new();
        let key = store.insert_blob(certificate(0), 0);

        assert_matches!(
            store.update_blob_status(key, BlobStatus::Complete).await,
            Err(DalError::IllegalTransition { .. })
        );

        store
            .update_blob_status(key, BlobStatus::GatheringSignatures)
            .await
            .unwrap();
        store
            .update_blob_status(key, BlobStatus::Complete)
            .await
            .unwrap();

        // Terminal states accept no further transitions.
        assert_matches!(
            store.update_blob_status(key, BlobStatus::Failed).await,
            Err(DalError::IllegalTransition { .. })
        );
    }

    #[tokio::test]
    async fn keyed_puts_are_idempotent() {
        let store = MemoryBlobMetadataStore::new();
        let header = BatchHeader::default();
        let hash = header.hash();

        store.put_batch_header(hash, &header).await.unwrap();
        store.put_batch_header(hash, &header).await.unwrap();

        let mut other = header;
        other.reference_block = lumen_basic_types::L1BlockNumber(99);
        assert_matches!(
            store.put_batch_header(hash, &other).await,
            Err(DalError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn write_faults_are_transient() {
        let store = MemoryBlobMetadataStore::new();
        let key = store.insert_blob(certificate(0), 0);
        store.fail_next_writes(1);

        let err = store
            .update_blob_status(key, BlobStatus::GatheringSignatures)
            .await
            .unwrap_err();
        assert!(err.is_retriable());

        store
            .update_blob_status(key, BlobStatus::GatheringSignatures)
            .await
            .unwrap();
    }
}
