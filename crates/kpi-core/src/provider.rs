//! Provider traits for the external collaborators of the dashboard.
//!
//! - [`KpiProvider`] - Per-territory KPI queries
//! - [`TerritorySource`] - Territories owned by the current manager

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::Result,
    period::{MetricKind, Period},
    types::{TerritoryId, TerritorySet},
};

/// Source of per-territory KPI payloads.
///
/// One call answers one `(metric, territory, period)` query. Providers own no
/// state beyond their connection details; decoding into a typed record is
/// done by [`KpiRecord::decode`](crate::metric::KpiRecord::decode).
#[async_trait]
pub trait KpiProvider: Send + Sync + Debug {
    /// Returns the name of this provider.
    fn name(&self) -> &str;

    /// Fetches the raw KPI payload for one territory.
    async fn fetch_kpi(
        &self,
        kind: MetricKind,
        territory: &TerritoryId,
        period: Period,
    ) -> Result<serde_json::Value>;
}

/// Source of the territory identifiers owned by the current manager.
///
/// Membership may change over a session, for example after a reassignment.
#[async_trait]
pub trait TerritorySource: Send + Sync + Debug {
    /// Returns the manager's territories in their natural order.
    async fn territories(&self) -> Result<TerritorySet>;
}
