//! In-memory blob store implementation.

use async_trait::async_trait;
use kpi_core::{BlobStore, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Simple in-memory blob store for testing and development.
///
/// Blobs are stored in a `RwLock`-protected `HashMap` and are lost when the
/// store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    #[instrument(skip(self))]
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().await;
        match blobs.get(key) {
            Some(bytes) => {
                debug!("Loaded {} bytes", bytes.len());
                Ok(Some(bytes.clone()))
            }
            None => {
                debug!("Nothing stored");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value), fields(len = value.len()))]
    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}
