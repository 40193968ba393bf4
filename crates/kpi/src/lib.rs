#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/kpi/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Multi-territory KPI dashboard for sales managers.
//!
//! This crate re-exports the core types, the cache store and the HTTP
//! provider, and provides [`KpiDashboard`], the orchestrator that keeps one
//! rollup per `(metric, period)` current for the manager's territory scope.
//!
//! # Features
//!
//! - `http` - REST provider for per-territory KPI payloads
//! - `cache-sqlite` - SQLite-backed persistence of the cache
//!
//! # Example
//!
//! ```rust,ignore
//! use kpi::{DashboardConfig, HttpKpiProvider, KpiDashboard, MetricKind, Period, SqliteBlobStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> kpi::Result<()> {
//!     let provider = Arc::new(
//!         HttpKpiProvider::new("https://sfa.example.com/api").with_bearer_token("session-token"),
//!     );
//!     let storage = Arc::new(SqliteBlobStore::new("kpi.db")?);
//!     let dashboard = KpiDashboard::open(provider.clone(), storage, DashboardConfig::default()).await;
//!
//!     dashboard.sync_territories(provider.as_ref()).await?;
//!     let report = dashboard.select_period(Period::Week).await;
//!     for (kind, error) in report.failures() {
//!         eprintln!("{kind}: {error}");
//!     }
//!
//!     println!("{:?}", dashboard.tile(MetricKind::Revenue).await.headline());
//!     println!("{:?}", dashboard.dropsize(Period::Week).await);
//!
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use kpi_core::*;

// Cache
#[cfg(feature = "cache-sqlite")]
pub use kpi_cache::SqliteBlobStore;
pub use kpi_cache::{CacheEntry, CacheStore, InMemoryBlobStore, NoopBlobStore, STORAGE_KEY};

// Providers
#[cfg(feature = "http")]
pub use kpi_http::HttpKpiProvider;

/// Dashboard configuration.
pub mod config;
pub use config::DashboardConfig;

mod dashboard;
pub use dashboard::{KpiDashboard, MetricTile, RefreshOutcome, RefreshReport};
