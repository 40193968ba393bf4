//! Per-metric records and their reducers.
//!
//! Every KPI family has one fixed-shape record. The same shape serves both as
//! the per-territory payload returned by the fetch client and as the rolled-up
//! aggregate for a territory set: raw counters are summed element-wise, then
//! the derived ratio is recomputed from the summed numerator and denominator.
//! Ratios are never averaged across territories.
//!
//! - [`RevenueRecord`] - Amounts and order counts
//! - [`LinesPerOrderRecord`] - Lines per order
//! - [`CoverageRecord`] - Visited vs target clients
//! - [`HitRateRecord`] - Visits with a sale vs total visits
//! - [`VisitFrequencyRecord`] - Visits per visited client
//! - [`SalesPerVisitRecord`] - Sales amount per visit
//! - [`Aggregate`] - Type-erased rollup stored in the cache

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{
    error::{KpiError, Result},
    period::{MetricKind, Period},
    types::{Window, zero_if_null},
};

/// A fixed-shape KPI record for one metric kind.
///
/// Implementors provide the element-wise sum and the ratio recomputation; the
/// fold itself is shared by [`reduce`].
pub trait KpiRecord:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The metric kind this record belongs to.
    const KIND: MetricKind;

    /// Returns the window this record covers.
    fn window(&self) -> &Window;

    /// Returns the window mutably.
    fn window_mut(&mut self) -> &mut Window;

    /// Adds the raw counters of `other` into `self`.
    fn accumulate(&mut self, other: &Self);

    /// Recomputes the derived ratio from the raw counters.
    fn recompute(&mut self);

    /// Wraps the record into the type-erased [`Aggregate`].
    fn into_aggregate(self) -> Aggregate;

    /// Borrows the record out of an [`Aggregate`] of the same kind.
    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self>;

    /// Decodes a KPI payload for `period`.
    ///
    /// Missing or `null` counters decode to zero. A payload without a period
    /// is stamped with the requested one.
    fn decode(value: serde_json::Value, period: Period) -> Result<Self> {
        let mut record: Self = serde_json::from_value(value)
            .map_err(|e| KpiError::Parse(format!("{}: {e}", Self::KIND)))?;
        record.window_mut().period.get_or_insert(period);
        Ok(record)
    }
}

/// Folds per-territory records of one metric kind into a single aggregate.
///
/// The window is copied from the first record. Returns
/// [`KpiError::EmptyScope`] when `records` is empty.
pub fn reduce<R: KpiRecord>(records: &[R]) -> Result<R> {
    let (first, rest) = records
        .split_first()
        .ok_or(KpiError::EmptyScope(R::KIND.as_str()))?;
    let mut total = first.clone();
    for record in rest {
        total.accumulate(record);
    }
    total.recompute();
    Ok(total)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn percent(numerator: f64, denominator: f64) -> f64 {
    ratio(numerator, denominator) * 100.0
}

/// Revenue amounts for a territory or scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueRecord {
    /// Period and date range.
    #[serde(flatten)]
    pub window: Window,
    /// Total revenue.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub value: f64,
    /// Number of orders.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub order_count: u64,
    /// Tax amount.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub tax_amount: f64,
    /// Amount excluding tax.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub amount_ht: f64,
    /// Amount including tax.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub amount_ttc: f64,
}

impl KpiRecord for RevenueRecord {
    const KIND: MetricKind = MetricKind::Revenue;

    fn window(&self) -> &Window {
        &self.window
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    fn accumulate(&mut self, other: &Self) {
        self.value += other.value;
        self.order_count += other.order_count;
        self.tax_amount += other.tax_amount;
        self.amount_ht += other.amount_ht;
        self.amount_ttc += other.amount_ttc;
    }

    fn recompute(&mut self) {}

    fn into_aggregate(self) -> Aggregate {
        Aggregate::Revenue(self)
    }

    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
        match aggregate {
            Aggregate::Revenue(record) => Some(record),
            _ => None,
        }
    }
}

/// Order lines per order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinesPerOrderRecord {
    /// Period and date range.
    #[serde(flatten)]
    pub window: Window,
    /// Total order lines.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub total_lines: u64,
    /// Number of orders.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub order_count: u64,
    /// Lines divided by orders.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub lines_per_order: f64,
}

impl KpiRecord for LinesPerOrderRecord {
    const KIND: MetricKind = MetricKind::LinesPerOrder;

    fn window(&self) -> &Window {
        &self.window
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    fn accumulate(&mut self, other: &Self) {
        self.total_lines += other.total_lines;
        self.order_count += other.order_count;
    }

    fn recompute(&mut self) {
        self.lines_per_order = ratio(self.total_lines as f64, self.order_count as f64);
    }

    fn into_aggregate(self) -> Aggregate {
        Aggregate::LinesPerOrder(self)
    }

    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
        match aggregate {
            Aggregate::LinesPerOrder(record) => Some(record),
            _ => None,
        }
    }
}

/// Client coverage: visited clients against the target portfolio.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRecord {
    /// Period and date range.
    #[serde(flatten)]
    pub window: Window,
    /// Distinct clients visited.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub visited_clients: u64,
    /// Clients in the target portfolio.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub target_clients: u64,
    /// Visited over target, as a percentage.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub coverage_rate: f64,
}

impl KpiRecord for CoverageRecord {
    const KIND: MetricKind = MetricKind::Coverage;

    fn window(&self) -> &Window {
        &self.window
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    fn accumulate(&mut self, other: &Self) {
        self.visited_clients += other.visited_clients;
        self.target_clients += other.target_clients;
    }

    fn recompute(&mut self) {
        self.coverage_rate = percent(self.visited_clients as f64, self.target_clients as f64);
    }

    fn into_aggregate(self) -> Aggregate {
        Aggregate::Coverage(self)
    }

    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
        match aggregate {
            Aggregate::Coverage(record) => Some(record),
            _ => None,
        }
    }
}

/// Hit rate: visits that produced a sale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitRateRecord {
    /// Period and date range.
    #[serde(flatten)]
    pub window: Window,
    /// Visits that produced at least one sale.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub visits_with_sale: u64,
    /// All visits.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub total_visits: u64,
    /// Visits with sale over total visits, as a percentage.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub hit_rate: f64,
}

impl KpiRecord for HitRateRecord {
    const KIND: MetricKind = MetricKind::HitRate;

    fn window(&self) -> &Window {
        &self.window
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    fn accumulate(&mut self, other: &Self) {
        self.visits_with_sale += other.visits_with_sale;
        self.total_visits += other.total_visits;
    }

    fn recompute(&mut self) {
        self.hit_rate = percent(self.visits_with_sale as f64, self.total_visits as f64);
    }

    fn into_aggregate(self) -> Aggregate {
        Aggregate::HitRate(self)
    }

    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
        match aggregate {
            Aggregate::HitRate(record) => Some(record),
            _ => None,
        }
    }
}

/// Visit frequency: visits per visited client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitFrequencyRecord {
    /// Period and date range.
    #[serde(flatten)]
    pub window: Window,
    /// All visits.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub total_visits: u64,
    /// Distinct clients visited.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub visited_clients: u64,
    /// Visits divided by visited clients.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub frequency: f64,
}

impl KpiRecord for VisitFrequencyRecord {
    const KIND: MetricKind = MetricKind::VisitFrequency;

    fn window(&self) -> &Window {
        &self.window
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    fn accumulate(&mut self, other: &Self) {
        self.total_visits += other.total_visits;
        self.visited_clients += other.visited_clients;
    }

    fn recompute(&mut self) {
        self.frequency = ratio(self.total_visits as f64, self.visited_clients as f64);
    }

    fn into_aggregate(self) -> Aggregate {
        Aggregate::VisitFrequency(self)
    }

    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
        match aggregate {
            Aggregate::VisitFrequency(record) => Some(record),
            _ => None,
        }
    }
}

/// Sales amount per visit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesPerVisitRecord {
    /// Period and date range.
    #[serde(flatten)]
    pub window: Window,
    /// Sales amount over the window.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub sales_amount: f64,
    /// All visits.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub total_visits: u64,
    /// Sales amount divided by visits.
    #[serde(default, deserialize_with = "zero_if_null")]
    pub sales_per_visit: f64,
}

impl KpiRecord for SalesPerVisitRecord {
    const KIND: MetricKind = MetricKind::SalesPerVisit;

    fn window(&self) -> &Window {
        &self.window
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    fn accumulate(&mut self, other: &Self) {
        self.sales_amount += other.sales_amount;
        self.total_visits += other.total_visits;
    }

    fn recompute(&mut self) {
        self.sales_per_visit = ratio(self.sales_amount, self.total_visits as f64);
    }

    fn into_aggregate(self) -> Aggregate {
        Aggregate::SalesPerVisit(self)
    }

    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
        match aggregate {
            Aggregate::SalesPerVisit(record) => Some(record),
            _ => None,
        }
    }
}

/// A rolled-up KPI for one metric kind, period and territory scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", content = "record", rename_all = "kebab-case")]
pub enum Aggregate {
    /// Revenue rollup.
    Revenue(RevenueRecord),
    /// Lines-per-order rollup.
    LinesPerOrder(LinesPerOrderRecord),
    /// Coverage rollup.
    Coverage(CoverageRecord),
    /// Hit-rate rollup.
    HitRate(HitRateRecord),
    /// Visit-frequency rollup.
    VisitFrequency(VisitFrequencyRecord),
    /// Sales-per-visit rollup.
    SalesPerVisit(SalesPerVisitRecord),
}

impl Aggregate {
    /// Returns the metric kind of this aggregate.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Revenue(_) => MetricKind::Revenue,
            Self::LinesPerOrder(_) => MetricKind::LinesPerOrder,
            Self::Coverage(_) => MetricKind::Coverage,
            Self::HitRate(_) => MetricKind::HitRate,
            Self::VisitFrequency(_) => MetricKind::VisitFrequency,
            Self::SalesPerVisit(_) => MetricKind::SalesPerVisit,
        }
    }

    /// Returns the window the aggregate covers.
    #[must_use]
    pub const fn window(&self) -> &Window {
        match self {
            Self::Revenue(r) => &r.window,
            Self::LinesPerOrder(r) => &r.window,
            Self::Coverage(r) => &r.window,
            Self::HitRate(r) => &r.window,
            Self::VisitFrequency(r) => &r.window,
            Self::SalesPerVisit(r) => &r.window,
        }
    }

    /// Returns the number shown on the metric tile.
    ///
    /// Revenue shows its total; every other kind shows its ratio.
    #[must_use]
    pub const fn headline(&self) -> f64 {
        match self {
            Self::Revenue(r) => r.value,
            Self::LinesPerOrder(r) => r.lines_per_order,
            Self::Coverage(r) => r.coverage_rate,
            Self::HitRate(r) => r.hit_rate,
            Self::VisitFrequency(r) => r.frequency,
            Self::SalesPerVisit(r) => r.sales_per_visit,
        }
    }

    /// Borrows the typed record if the aggregate is of kind `R::KIND`.
    #[must_use]
    pub fn get<R: KpiRecord>(&self) -> Option<&R> {
        R::from_aggregate(self)
    }
}
