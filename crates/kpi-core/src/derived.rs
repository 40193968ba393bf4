//! Metrics derived from one or more cached aggregates.
//!
//! Derived values have no cache entry of their own. They are recomputed from
//! whatever aggregates are current and are `None` when an input is missing or
//! its denominator is zero.

use serde::{Deserialize, Serialize};

use crate::metric::{HitRateRecord, RevenueRecord};

/// Average revenue per order.
#[must_use]
pub fn dropsize(revenue: &RevenueRecord) -> Option<f64> {
    (revenue.order_count > 0).then(|| revenue.value / revenue.order_count as f64)
}

/// Revenue per visit, combining the revenue and hit-rate rollups.
#[must_use]
pub fn revenue_per_visit(revenue: &RevenueRecord, visits: &HitRateRecord) -> Option<f64> {
    (visits.total_visits > 0).then(|| revenue.value / visits.total_visits as f64)
}

/// Derived values for one period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Average revenue per order.
    pub dropsize: Option<f64>,
    /// Revenue per visit.
    pub revenue_per_visit: Option<f64>,
}

impl DerivedMetrics {
    /// Computes every derived value from the available aggregates.
    #[must_use]
    pub fn compute(revenue: Option<&RevenueRecord>, visits: Option<&HitRateRecord>) -> Self {
        Self {
            dropsize: revenue.and_then(dropsize),
            revenue_per_visit: revenue.zip(visits).and_then(|(r, v)| revenue_per_visit(r, v)),
        }
    }
}
