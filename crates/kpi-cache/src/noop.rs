//! No-op blob store implementation.

use async_trait::async_trait;
use kpi_core::{BlobStore, Result};
use tracing::trace;

/// A blob store that doesn't store anything.
///
/// `load` always returns `Ok(None)` and writes succeed without effect. Useful
/// for sessions that must not leave KPI data on the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBlobStore;

impl NoopBlobStore {
    /// Create a new no-op store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlobStore for NoopBlobStore {
    async fn load(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        trace!("NoopBlobStore: load called, returning None");
        Ok(None)
    }

    async fn store(&self, _key: &str, _value: &[u8]) -> Result<()> {
        trace!("NoopBlobStore: store called, doing nothing");
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        trace!("NoopBlobStore: remove called, doing nothing");
        Ok(())
    }
}
