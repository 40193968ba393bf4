//! Period and metric kind definitions.
//!
//! This module defines [`Period`], the aggregation window selected by the user,
//! and [`MetricKind`], the six KPI families the dashboard rolls up.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KpiError;

/// Aggregation time window for KPI queries and cache buckets.
///
/// Serializes lowercase; deserializes through [`FromStr`], ignoring case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// The current day.
    Today,
    /// The current week.
    Week,
    /// The current month.
    Month,
    /// The current quarter.
    Quarter,
}

impl Period {
    /// All periods, in display order.
    pub const ALL: [Self; 4] = [Self::Today, Self::Week, Self::Month, Self::Quarter];

    /// Returns the query-string value used by the KPI endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = KpiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            other => Err(KpiError::InvalidParameter(format!(
                "Unknown period: {other}. Supported: today, week, month, quarter"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One of the six KPI families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    /// Revenue amounts and order counts.
    Revenue,
    /// Order lines per order.
    LinesPerOrder,
    /// Share of target clients visited.
    Coverage,
    /// Share of visits that produced a sale.
    HitRate,
    /// Visits per visited client.
    VisitFrequency,
    /// Sales amount per visit.
    SalesPerVisit,
}

impl MetricKind {
    /// All metric kinds, in dashboard order.
    pub const ALL: [Self; 6] = [
        Self::Revenue,
        Self::LinesPerOrder,
        Self::Coverage,
        Self::HitRate,
        Self::VisitFrequency,
        Self::SalesPerVisit,
    ];

    /// Returns the metric name used in the KPI endpoint path.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::LinesPerOrder => "lines-per-order",
            Self::Coverage => "coverage",
            Self::HitRate => "hit-rate",
            Self::VisitFrequency => "visit-frequency",
            Self::SalesPerVisit => "sales-per-visit",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = KpiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| KpiError::InvalidParameter(format!("Unknown metric: {s}")))
    }
}
