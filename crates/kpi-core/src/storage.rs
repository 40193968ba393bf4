//! Durable key-value storage abstraction.
//!
//! This module defines the [`BlobStore`] trait the cache store persists its
//! serialized contents through. Backends are best-effort: callers log and
//! swallow their failures rather than treating them as fatal.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;

/// Trait for persisting opaque blobs across process restarts.
///
/// Implementations can store data in various backends (SQLite, in-memory, etc.).
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Retrieves the blob stored under `key`.
    ///
    /// Returns `Ok(Some(bytes))` if present, `Ok(None)` if nothing is stored.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous blob.
    async fn store(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes the blob stored under `key`, if any.
    async fn remove(&self, key: &str) -> Result<()>;
}
