#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/kpi/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for territory KPI aggregation.
//!
//! This crate provides the foundational abstractions for the manager dashboard:
//!
//! - [`KpiProvider`](provider::KpiProvider) - Per-territory KPI queries
//! - [`TerritorySource`](provider::TerritorySource) - Manager territory membership
//! - [`KpiRecord`](metric::KpiRecord) - Fixed-shape records and the shared [`reduce`](metric::reduce)
//! - [`DerivedMetrics`](derived::DerivedMetrics) - Values computed across aggregates
//! - [`BlobStore`](storage::BlobStore) - Durable storage abstraction
//! - [`Clock`](clock::Clock) - Time source for cache timestamps

/// Wall-clock abstraction.
pub mod clock;
/// Metrics derived from cached aggregates.
pub mod derived;
/// Error types for KPI operations.
pub mod error;
/// Per-metric records and reducers.
pub mod metric;
/// Period and metric kind definitions.
pub mod period;
/// Provider traits for external collaborators.
pub mod provider;
/// Durable storage trait.
pub mod storage;
/// Territory, scope and window types.
pub mod types;

// Re-export commonly used items at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use derived::{DerivedMetrics, dropsize, revenue_per_visit};
pub use error::{KpiError, Result};
pub use metric::{
    Aggregate, CoverageRecord, HitRateRecord, KpiRecord, LinesPerOrderRecord, RevenueRecord,
    SalesPerVisitRecord, VisitFrequencyRecord, reduce,
};
pub use period::{MetricKind, Period};
pub use provider::{KpiProvider, TerritorySource};
pub use storage::BlobStore;
pub use types::{ScopeKey, TerritoryId, TerritorySet, Window};
