//! Set of blob keys currently claimed by an in-flight batch.
//!
//! Deduplicates candidates across cursor restarts within one process. The
//! durable analogue is the `Encoded -> GatheringSignatures` transition in
//! the metadata store; this set only avoids re-fetching.

use std::{collections::HashSet, sync::Mutex};

use lumen_basic_types::BlobKey;

#[derive(Debug, Default)]
pub struct BlobSet {
    inner: Mutex<HashSet<BlobKey>>,
}

impl BlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_blob(&self, blob_key: BlobKey) {
        self.inner.lock().unwrap().insert(blob_key);
    }

    pub fn contains(&self, blob_key: &BlobKey) -> bool {
        self.inner.lock().unwrap().contains(blob_key)
    }

    pub fn remove_blob(&self, blob_key: &BlobKey) {
        self.inner.lock().unwrap().remove(blob_key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
