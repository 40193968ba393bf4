#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/kpi/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Period-scoped KPI cache store.
//!
//! This crate provides [`CacheStore`], the write-through cache of rolled-up
//! aggregates, and implementations of the [`BlobStore`] trait from `kpi-core`
//! it persists through:
//!
//! - [`SqliteBlobStore`] - Persistent SQLite-based storage (default, requires `sqlite` feature)
//! - [`InMemoryBlobStore`] - Simple in-memory storage for testing
//! - [`NoopBlobStore`] - No-op storage that doesn't keep anything

/// In-memory blob store implementation.
pub mod memory;
/// No-op blob store implementation.
pub mod noop;
/// The KPI cache store.
pub mod store;

/// SQLite-based blob store implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the trait for convenience
pub use kpi_core::BlobStore;

// Re-export implementations
pub use memory::InMemoryBlobStore;
pub use noop::NoopBlobStore;
pub use store::{CacheEntry, CacheStore, STORAGE_KEY};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBlobStore;
