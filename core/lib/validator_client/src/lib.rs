//! Clients for the operator-node dispersal API.
//!
//! The dispatcher talks to every committee member through the
//! [`ValidatorClient`] trait; [`ValidatorClientManager`] owns one client per
//! dispersal socket and reuses connections across batches.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use base64::Engine;
use lumen_bls::Signature;
use lumen_types::{BatchHeader, ChunkAssignment};
use serde_json::json;
use tokio::sync::Mutex;

/// Error returned by an operator RPC, tagged with whether retrying the call
/// can help.
#[derive(Debug)]
pub struct ClientError {
    pub error: anyhow::Error,
    pub is_retriable: bool,
}

impl ClientError {
    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            is_retriable: true,
        }
    }

    pub fn permanent(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            is_retriable: false,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.is_retriable
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// RPC surface an operator node presents to the dispatcher. The returned
/// signature is the operator's BLS signature over the batch header hash; it
/// is verified by the aggregation stage, not by the client.
#[async_trait]
pub trait ValidatorClient: Sync + Send + fmt::Debug {
    async fn store_chunks(
        &self,
        batch_header: &BatchHeader,
        assignment: &ChunkAssignment,
    ) -> Result<Signature, ClientError>;

    fn clone_boxed(&self) -> Box<dyn ValidatorClient>;
}

/// An implementation of the `ValidatorClient` trait for operators serving
/// the HTTP dispersal endpoint.
#[derive(Debug, Clone)]
pub struct HttpValidatorClient {
    base_url: String,
    client: Arc<reqwest::Client>,
}

impl HttpValidatorClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: Arc::new(reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl ValidatorClient for HttpValidatorClient {
    async fn store_chunks(
        &self,
        batch_header: &BatchHeader,
        assignment: &ChunkAssignment,
    ) -> Result<Signature, ClientError> {
        let url = format!("{}/v1/store_chunks", self.base_url);
        let blobs: Vec<_> = assignment
            .blobs
            .iter()
            .map(|blob| {
                json!({
                    "blob_key": blob.blob_key.to_string(),
                    "quorums": blob.quorums.iter().map(|quorum| quorum.0).collect::<Vec<_>>(),
                })
            })
            .collect();
        let body = json!({
            "batch_root": base64::engine::general_purpose::STANDARD.encode(batch_header.batch_root),
            "reference_block": batch_header.reference_block.0,
            "blobs": blobs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::transient)?;

        if !res.status().is_success() {
            return Err(ClientError::permanent(anyhow::anyhow!(
                "store_chunks failed: {}",
                res.status()
            )));
        }

        let response: serde_json::Value = res.json().await.map_err(ClientError::permanent)?;
        let signature_hex = response
            .get("signature")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                ClientError::permanent(anyhow::anyhow!("store_chunks response lacks a signature"))
            })?;
        let bytes = hex::decode(signature_hex).map_err(ClientError::permanent)?;
        Signature::from_bytes(&bytes).map_err(ClientError::permanent)
    }

    fn clone_boxed(&self) -> Box<dyn ValidatorClient> {
        Box::new(self.clone())
    }
}

type ClientFactory = Box<dyn Fn(&str) -> anyhow::Result<Arc<dyn ValidatorClient>> + Send + Sync>;

/// Pool of per-operator clients keyed by dispersal socket. Connection reuse
/// lives here; concurrency limits live in the fan-out stage.
pub struct ValidatorClientManager {
    clients: Mutex<HashMap<String, Arc<dyn ValidatorClient>>>,
    factory: ClientFactory,
}

impl ValidatorClientManager {
    /// Manager producing HTTP clients; the production configuration.
    pub fn http() -> Self {
        Self::new(Box::new(|socket| {
            Ok(Arc::new(HttpValidatorClient::new(socket.to_owned())) as Arc<dyn ValidatorClient>)
        }))
    }

    /// Manager with an injected client factory. Tests use this to plug in
    /// scripted operator behavior.
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            factory,
        }
    }

    pub async fn get_client(&self, socket: &str) -> anyhow::Result<Arc<dyn ValidatorClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(socket) {
            return Ok(client.clone());
        }
        let client = (self.factory)(socket)?;
        clients.insert(socket.to_owned(), client.clone());
        Ok(client)
    }

    pub async fn cached_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}

impl fmt::Debug for ValidatorClientManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorClientManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone)]
    struct NullClient;

    #[async_trait]
    impl ValidatorClient for NullClient {
        async fn store_chunks(
            &self,
            _batch_header: &BatchHeader,
            _assignment: &ChunkAssignment,
        ) -> Result<Signature, ClientError> {
            Err(ClientError::permanent(anyhow::anyhow!("null client")))
        }

        fn clone_boxed(&self) -> Box<dyn ValidatorClient> {
            Box::new(self.clone())
        }
    }

    #[tokio::test]
    async fn manager_caches_clients_per_socket() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let manager = ValidatorClientManager::new(Box::new(move |_socket| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullClient) as Arc<dyn ValidatorClient>)
        }));

        manager.get_client("http://operator-0:3000").await.unwrap();
        manager.get_client("http://operator-0:3000").await.unwrap();
        manager.get_client("http://operator-1:3000").await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.cached_count().await, 2);
    }
}
