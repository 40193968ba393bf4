//! The manager dashboard: aggregation orchestrator and query interface.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use tracing::{debug, instrument, warn};

use kpi_cache::{CacheEntry, CacheStore};
use kpi_core::{
    Aggregate, BlobStore, CoverageRecord, DerivedMetrics, HitRateRecord, KpiError, KpiProvider,
    KpiRecord, LinesPerOrderRecord, MetricKind, Period, Result, RevenueRecord,
    SalesPerVisitRecord, ScopeKey, SystemClock, TerritoryId, TerritorySet, TerritorySource,
    VisitFrequencyRecord, reduce,
};

use crate::config::DashboardConfig;

/// What a single metric refresh did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The territory set was empty; nothing was fetched.
    EmptyScope,
    /// A fresh aggregate for the same scope was already cached.
    CacheHit,
    /// Every territory was fetched and the new aggregate was cached.
    Refreshed,
    /// The selection changed while fetching; the result was dropped.
    Discarded,
}

/// Per-metric results of a dashboard-wide refresh.
#[derive(Debug)]
pub struct RefreshReport {
    /// Period the refresh ran for.
    pub period: Period,
    /// Result of each metric's refresh.
    pub results: BTreeMap<MetricKind, Result<RefreshOutcome>>,
}

impl RefreshReport {
    /// Returns the outcome for `kind` if its refresh succeeded.
    #[must_use]
    pub fn outcome(&self, kind: MetricKind) -> Option<RefreshOutcome> {
        self.results.get(&kind)?.as_ref().ok().copied()
    }

    /// Returns the metrics whose refresh failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (MetricKind, &KpiError)> {
        self.results
            .iter()
            .filter_map(|(kind, result)| result.as_ref().err().map(|e| (*kind, e)))
    }

    /// Returns true if no metric failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// What a metric tile should render.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricTile {
    /// Metric kind.
    pub kind: MetricKind,
    /// Period shown.
    pub period: Period,
    /// Last cached aggregate, possibly stale. `None` renders as unavailable.
    pub aggregate: Option<Aggregate>,
    /// When the aggregate was computed.
    pub computed_at: Option<DateTime<Utc>>,
    /// A refresh is in flight.
    pub loading: bool,
    /// Error to show; only set when there is no cached value to fall back on.
    pub error: Option<String>,
}

impl MetricTile {
    /// Returns the number to display, or `None` for the unavailable placeholder.
    #[must_use]
    pub fn headline(&self) -> Option<f64> {
        self.aggregate.as_ref().map(Aggregate::headline)
    }

    /// Returns true if the tile has nothing to show.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        self.aggregate.is_none()
    }
}

#[derive(Debug, Default)]
struct MetricStatus {
    in_flight: u32,
    error: Option<String>,
}

#[derive(Debug)]
struct Selection {
    period: Period,
    territories: Option<TerritorySet>,
    scope_key: Option<ScopeKey>,
    generation: u64,
}

impl Selection {
    fn matches(&self, period: Period, scope_key: &ScopeKey) -> bool {
        self.period == period && self.scope_key.as_ref() == Some(scope_key)
    }
}

/// Marks a metric as loading until dropped.
struct LoadingGuard<'a> {
    dashboard: &'a KpiDashboard,
    kind: MetricKind,
}

impl<'a> LoadingGuard<'a> {
    fn new(dashboard: &'a KpiDashboard, kind: MetricKind) -> Self {
        dashboard.with_status(kind, |status| status.in_flight += 1);
        Self { dashboard, kind }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.dashboard.with_status(self.kind, |status| {
            status.in_flight = status.in_flight.saturating_sub(1);
        });
    }
}

/// Session-scoped service that keeps the manager's KPI rollups current.
///
/// The dashboard is the only writer of its [`CacheStore`]. For each metric
/// kind it decides whether the cached aggregate for the selected period and
/// territory scope can be reused, and otherwise fetches every territory in
/// parallel, folds the records, and replaces the cache entry. Metric kinds
/// refresh concurrently and fail independently.
///
/// # Example
///
/// ```rust,ignore
/// use kpi::{DashboardConfig, HttpKpiProvider, KpiDashboard, MetricKind, Period, SqliteBlobStore};
/// use std::sync::Arc;
///
/// let provider = Arc::new(HttpKpiProvider::new("https://sfa.example.com/api"));
/// let storage = Arc::new(SqliteBlobStore::new("kpi.db")?);
/// let dashboard = KpiDashboard::open(provider.clone(), storage, DashboardConfig::default()).await;
///
/// dashboard.sync_territories(provider.as_ref()).await?;
/// dashboard.select_period(Period::Week).await;
/// let revenue = dashboard.tile(MetricKind::Revenue).await;
/// ```
pub struct KpiDashboard {
    provider: Arc<dyn KpiProvider>,
    cache: Arc<CacheStore>,
    config: DashboardConfig,
    selection: RwLock<Selection>,
    status: RwLock<HashMap<MetricKind, MetricStatus>>,
}

impl fmt::Debug for KpiDashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KpiDashboard")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KpiDashboard {
    /// Create a dashboard over an existing cache store.
    #[must_use]
    pub fn new(
        provider: Arc<dyn KpiProvider>,
        cache: Arc<CacheStore>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            selection: RwLock::new(Selection {
                period: config.default_period,
                territories: None,
                scope_key: None,
                generation: 0,
            }),
            status: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a dashboard whose cache is rehydrated from `storage`.
    pub async fn open(
        provider: Arc<dyn KpiProvider>,
        storage: Arc<dyn BlobStore>,
        config: DashboardConfig,
    ) -> Self {
        let cache = CacheStore::open(storage, Arc::new(SystemClock)).await;
        Self::new(provider, Arc::new(cache), config)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Returns the cache store for read access.
    #[must_use]
    pub const fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Returns the selected period.
    #[must_use]
    pub fn selected_period(&self) -> Period {
        self.read_selection(|s| s.period)
    }

    /// Returns the current territory set, or `None` before it first loads.
    #[must_use]
    pub fn territories(&self) -> Option<TerritorySet> {
        self.read_selection(|s| s.territories.clone())
    }

    /// Selects `period` and refreshes every metric for it.
    #[instrument(skip(self))]
    pub async fn select_period(&self, period: Period) -> RefreshReport {
        self.write_selection(|s| {
            if s.period != period {
                s.period = period;
                s.generation += 1;
            }
        });
        self.refresh_all().await
    }

    /// Replaces the manager's territory set.
    ///
    /// Refreshes every metric when the set loads for the first time or its
    /// membership changes; returns `None` when nothing changed.
    #[instrument(skip(self, territories), fields(count = territories.len()))]
    pub async fn set_territories(&self, territories: TerritorySet) -> Option<RefreshReport> {
        let scope_key = territories.scope_key();
        let changed = self.write_selection(|s| {
            if s.scope_key.as_ref() == Some(&scope_key) {
                return false;
            }
            s.territories = Some(territories);
            s.scope_key = Some(scope_key);
            s.generation += 1;
            true
        });

        if !changed {
            debug!("Territory membership unchanged");
            return None;
        }
        Some(self.refresh_all().await)
    }

    /// Pulls the manager's territories from `source` and applies them.
    ///
    /// # Errors
    /// Returns the source's error; the current selection is left as is.
    pub async fn sync_territories(
        &self,
        source: &dyn TerritorySource,
    ) -> Result<Option<RefreshReport>> {
        let territories = source.territories().await?;
        Ok(self.set_territories(territories).await)
    }

    /// Refreshes every metric for the current selection.
    ///
    /// Metrics refresh concurrently; one metric's failure does not affect the
    /// others.
    pub async fn refresh_all(&self) -> RefreshReport {
        let (period, territories) =
            self.read_selection(|s| (s.period, s.territories.clone().unwrap_or_default()));

        let territories = &territories;
        let results = join_all(MetricKind::ALL.map(|kind| async move {
            (kind, self.refresh(kind, period, territories).await)
        }))
        .await;

        RefreshReport {
            period,
            results: results.into_iter().collect(),
        }
    }

    /// Refreshes one metric for `period` across `territories`.
    ///
    /// An empty set is a no-op. A fresh cache entry for the same scope is
    /// reused without any request. Otherwise every territory is fetched in
    /// parallel; the aggregate is cached only if all of them succeed.
    ///
    /// # Errors
    /// Returns the first territory fetch error. The error is also kept as the
    /// metric's last error and any previously cached value is left in place.
    pub async fn refresh(
        &self,
        kind: MetricKind,
        period: Period,
        territories: &TerritorySet,
    ) -> Result<RefreshOutcome> {
        match kind {
            MetricKind::Revenue => {
                self.refresh_metric::<RevenueRecord>(period, territories)
                    .await
            }
            MetricKind::LinesPerOrder => {
                self.refresh_metric::<LinesPerOrderRecord>(period, territories)
                    .await
            }
            MetricKind::Coverage => {
                self.refresh_metric::<CoverageRecord>(period, territories)
                    .await
            }
            MetricKind::HitRate => {
                self.refresh_metric::<HitRateRecord>(period, territories)
                    .await
            }
            MetricKind::VisitFrequency => {
                self.refresh_metric::<VisitFrequencyRecord>(period, territories)
                    .await
            }
            MetricKind::SalesPerVisit => {
                self.refresh_metric::<SalesPerVisitRecord>(period, territories)
                    .await
            }
        }
    }

    #[instrument(skip(self, territories), fields(kind = %R::KIND, territories = territories.len()))]
    async fn refresh_metric<R: KpiRecord>(
        &self,
        period: Period,
        territories: &TerritorySet,
    ) -> Result<RefreshOutcome> {
        let kind = R::KIND;
        if territories.is_empty() {
            debug!("Empty territory set, skipping refresh");
            return Ok(RefreshOutcome::EmptyScope);
        }

        let scope_key = territories.scope_key();
        if self
            .cache
            .is_valid(kind, period, &scope_key, self.config.cache_ttl)
            .await
        {
            debug!("Cache hit");
            return Ok(RefreshOutcome::CacheHit);
        }

        let generation = self.read_selection(|s| s.generation);
        let _loading = LoadingGuard::new(self, kind);

        debug!("Cache miss, fetching territories");
        let fetched = try_join_all(
            territories
                .iter()
                .map(|territory| self.fetch_record::<R>(territory, period)),
        )
        .await
        .and_then(|records| reduce(&records));

        if self.is_superseded(generation, period, &scope_key) {
            debug!("Selection changed while fetching, discarding result");
            return Ok(RefreshOutcome::Discarded);
        }

        match fetched {
            Ok(aggregate) => {
                self.cache
                    .set(period, scope_key, aggregate.into_aggregate())
                    .await;
                self.with_status(kind, |status| status.error = None);
                Ok(RefreshOutcome::Refreshed)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed, keeping previous value");
                let message = e.to_string();
                self.with_status(kind, |status| status.error = Some(message));
                Err(e)
            }
        }
    }

    /// Fetches and decodes one territory's record with timeout and bounded retry.
    async fn fetch_record<R: KpiRecord>(&self, territory: &TerritoryId, period: Period) -> Result<R> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let response = tokio::time::timeout(
                self.config.fetch_timeout,
                self.provider.fetch_kpi(R::KIND, territory, period),
            )
            .await
            .unwrap_or_else(|_| Err(KpiError::Timeout(self.config.fetch_timeout)));

            match response.and_then(|payload| R::decode(payload, period)) {
                Ok(record) => return Ok(record),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        territory = %territory,
                        attempt,
                        error = %e,
                        "Territory fetch failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(territory = %territory, error = %e, "Territory fetch failed");
                    return Err(e);
                }
            }
        }
    }

    fn is_superseded(&self, generation: u64, period: Period, scope_key: &ScopeKey) -> bool {
        self.read_selection(|s| s.generation != generation && !s.matches(period, scope_key))
    }

    /// Returns the cached aggregate for `(kind, period)`, possibly stale.
    ///
    /// An aggregate computed for another territory scope than the selected
    /// one is unavailable.
    pub async fn current_aggregate(&self, kind: MetricKind, period: Period) -> Option<Aggregate> {
        self.scoped_entry(kind, period)
            .await
            .map(|entry| entry.aggregate.clone())
    }

    /// Returns the cache entry for `(kind, period)` if it belongs to the
    /// selected scope. Before territories load, any entry qualifies.
    async fn scoped_entry(&self, kind: MetricKind, period: Period) -> Option<Arc<CacheEntry>> {
        let entry = self.cache.get(kind, period).await?;
        let in_scope = self.read_selection(|s| {
            s.scope_key
                .as_ref()
                .is_none_or(|scope_key| *scope_key == entry.scope_key)
        });
        in_scope.then_some(entry)
    }

    /// Returns the raw cached entry for `(kind, period)`, whatever its scope.
    pub async fn current_entry(&self, kind: MetricKind, period: Period) -> Option<Arc<CacheEntry>> {
        self.cache.get(kind, period).await
    }

    /// Returns true while a refresh for `kind` is in flight.
    #[must_use]
    pub fn is_loading(&self, kind: MetricKind) -> bool {
        self.read_status(kind, |status| status.in_flight > 0)
    }

    /// Returns the error of the last failed refresh for `kind`.
    ///
    /// Cleared by the next successful refresh.
    #[must_use]
    pub fn last_error(&self, kind: MetricKind) -> Option<String> {
        self.read_status(kind, |status| status.error.clone())
    }

    /// Returns what the tile for `kind` should render for the selected period.
    ///
    /// A value cached for another territory scope is not shown.
    pub async fn tile(&self, kind: MetricKind) -> MetricTile {
        let period = self.selected_period();
        let entry = self.scoped_entry(kind, period).await;
        let error = match entry {
            Some(_) => None,
            None => self.last_error(kind),
        };

        MetricTile {
            kind,
            period,
            computed_at: entry.as_ref().map(|e| e.computed_at),
            aggregate: entry.map(|e| e.aggregate.clone()),
            loading: self.is_loading(kind),
            error,
        }
    }

    /// Recomputes the derived metrics for `period` from the cached aggregates.
    pub async fn derived(&self, period: Period) -> DerivedMetrics {
        let revenue = self.scoped_entry(MetricKind::Revenue, period).await;
        let visits = self.scoped_entry(MetricKind::HitRate, period).await;
        DerivedMetrics::compute(
            revenue.as_deref().and_then(CacheEntry::record::<RevenueRecord>),
            visits.as_deref().and_then(CacheEntry::record::<HitRateRecord>),
        )
    }

    /// Average revenue per order for `period`, or `None` when unavailable.
    pub async fn dropsize(&self, period: Period) -> Option<f64> {
        self.derived(period).await.dropsize
    }

    /// Tears the session down: clears the cache and its persisted copy, the
    /// selection and every metric's last error.
    ///
    /// Refreshes still in flight keep their loading flag until they resolve,
    /// then are discarded.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        self.write_selection(|s| {
            s.period = self.config.default_period;
            s.territories = None;
            s.scope_key = None;
            s.generation += 1;
        });
        for status in self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            status.error = None;
        }
        self.cache.clear().await;
    }

    fn read_selection<T>(&self, f: impl FnOnce(&Selection) -> T) -> T {
        f(&self.selection.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_selection<T>(&self, f: impl FnOnce(&mut Selection) -> T) -> T {
        f(&mut self.selection.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn read_status<T: Default>(&self, kind: MetricKind, f: impl FnOnce(&MetricStatus) -> T) -> T {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(f)
            .unwrap_or_default()
    }

    fn with_status(&self, kind: MetricKind, f: impl FnOnce(&mut MetricStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(status.entry(kind).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use kpi_cache::InMemoryBlobStore;
    use kpi_core::{Clock, ManualClock};
    use serde_json::{Value, json};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    /// Provider answering from a script of payloads and failures.
    #[derive(Debug, Default)]
    struct ScriptedProvider {
        payloads: Mutex<HashMap<(MetricKind, String), Value>>,
        failing: Mutex<HashSet<(MetricKind, String)>>,
        flaky: Mutex<HashMap<(MetricKind, String), u32>>,
        calls: Mutex<HashMap<MetricKind, usize>>,
        gate: Option<(Period, watch::Receiver<bool>)>,
        gated: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn gated(period: Period, gate: watch::Receiver<bool>) -> Self {
            Self {
                gate: Some((period, gate)),
                ..Default::default()
            }
        }

        fn delayed(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn respond(&self, kind: MetricKind, territory: &str, payload: Value) {
            self.payloads
                .lock()
                .unwrap()
                .insert((kind, territory.to_string()), payload);
        }

        fn fail(&self, kind: MetricKind, territory: &str) {
            self.failing
                .lock()
                .unwrap()
                .insert((kind, territory.to_string()));
        }

        fn fail_times(&self, kind: MetricKind, territory: &str, times: u32) {
            self.flaky
                .lock()
                .unwrap()
                .insert((kind, territory.to_string()), times);
        }

        fn calls(&self, kind: MetricKind) -> usize {
            self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl KpiProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_kpi(
            &self,
            kind: MetricKind,
            territory: &TerritoryId,
            period: Period,
        ) -> Result<Value> {
            *self.calls.lock().unwrap().entry(kind).or_default() += 1;

            if let Some((gated_period, gate)) = &self.gate {
                if *gated_period == period {
                    self.gated.fetch_add(1, Ordering::SeqCst);
                    let mut gate = gate.clone();
                    let opened = gate.wait_for(|open| *open).await.is_ok();
                    if !opened {
                        return Err(KpiError::Other("gate closed".into()));
                    }
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let key = (kind, territory.to_string());
            let flaky = {
                let mut flaky = self.flaky.lock().unwrap();
                match flaky.get_mut(&key) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if flaky || self.failing.lock().unwrap().contains(&key) {
                return Err(KpiError::Network(format!("connection reset ({territory})")));
            }

            let payload = self.payloads.lock().unwrap().get(&key).cloned();
            Ok(payload.unwrap_or_else(|| json!({})))
        }
    }

    #[derive(Debug)]
    struct FixedTerritories(Vec<&'static str>);

    #[async_trait]
    impl TerritorySource for FixedTerritories {
        async fn territories(&self) -> Result<TerritorySet> {
            Ok(self.0.iter().copied().collect())
        }
    }

    fn config() -> DashboardConfig {
        DashboardConfig::default().with_retry_backoff(Duration::ZERO)
    }

    fn territories(ids: &[&str]) -> TerritorySet {
        ids.iter().copied().collect()
    }

    fn dashboard_with(
        provider: Arc<ScriptedProvider>,
        clock: Arc<ManualClock>,
        config: DashboardConfig,
    ) -> KpiDashboard {
        let cache = CacheStore::new(Arc::new(InMemoryBlobStore::new())).with_clock(clock);
        KpiDashboard::new(provider, Arc::new(cache), config)
    }

    fn setup() -> (Arc<ScriptedProvider>, Arc<ManualClock>, KpiDashboard) {
        let provider = Arc::new(ScriptedProvider::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dashboard = dashboard_with(provider.clone(), clock.clone(), config());
        (provider, clock, dashboard)
    }

    #[tokio::test]
    async fn test_repeated_refresh_hits_cache() {
        let (provider, _, dashboard) = setup();
        let set = territories(&["T1", "T2"]);

        let first = dashboard
            .refresh(MetricKind::Revenue, Period::Week, &set)
            .await
            .unwrap();
        let second = dashboard
            .refresh(MetricKind::Revenue, Period::Week, &set)
            .await
            .unwrap();

        assert_eq!(first, RefreshOutcome::Refreshed);
        assert_eq!(second, RefreshOutcome::CacheHit);
        assert_eq!(provider.calls(MetricKind::Revenue), 2);
    }

    #[tokio::test]
    async fn test_scope_change_forces_refresh() {
        let (provider, _, dashboard) = setup();
        dashboard
            .refresh(MetricKind::HitRate, Period::Month, &territories(&["T1", "T2"]))
            .await
            .unwrap();

        // Same members in another order share the scope.
        let reordered = dashboard
            .refresh(MetricKind::HitRate, Period::Month, &territories(&["T2", "T1"]))
            .await
            .unwrap();
        assert_eq!(reordered, RefreshOutcome::CacheHit);

        let widened = dashboard
            .refresh(
                MetricKind::HitRate,
                Period::Month,
                &territories(&["T1", "T2", "T3"]),
            )
            .await
            .unwrap();
        assert_eq!(widened, RefreshOutcome::Refreshed);
        assert_eq!(provider.calls(MetricKind::HitRate), 5);

        let entry = dashboard
            .current_entry(MetricKind::HitRate, Period::Month)
            .await
            .unwrap();
        assert_eq!(entry.scope_key.as_str(), "T1,T2,T3");
    }

    #[tokio::test]
    async fn test_ttl_expiry_forces_refresh() {
        let (provider, clock, dashboard) = setup();
        let set = territories(&["T1"]);
        dashboard
            .refresh(MetricKind::Coverage, Period::Today, &set)
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(299));
        let outcome = dashboard
            .refresh(MetricKind::Coverage, Period::Today, &set)
            .await
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::CacheHit);

        clock.advance(TimeDelta::seconds(2));
        let outcome = dashboard
            .refresh(MetricKind::Coverage, Period::Today, &set)
            .await
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(provider.calls(MetricKind::Coverage), 2);
    }

    #[tokio::test]
    async fn test_empty_territory_set_is_noop() {
        let (provider, _, dashboard) = setup();
        let outcome = dashboard
            .refresh(MetricKind::Revenue, Period::Week, &TerritorySet::new())
            .await
            .unwrap();

        assert_eq!(outcome, RefreshOutcome::EmptyScope);
        assert_eq!(provider.total_calls(), 0);
        assert!(!dashboard.is_loading(MetricKind::Revenue));
        assert!(dashboard.cache().is_empty().await);

        // Before territories load, a dashboard-wide refresh does nothing either.
        let report = dashboard.refresh_all().await;
        assert!(report.is_success());
        assert_eq!(
            report.outcome(MetricKind::SalesPerVisit),
            Some(RefreshOutcome::EmptyScope)
        );
    }

    #[tokio::test]
    async fn test_hit_rate_aggregates_by_volume() {
        let (provider, _, dashboard) = setup();
        provider.respond(
            MetricKind::HitRate,
            "T1",
            json!({ "visitsWithSale": 5, "totalVisits": 10, "hitRate": 50.0 }),
        );
        provider.respond(
            MetricKind::HitRate,
            "T2",
            json!({ "visitsWithSale": 0, "totalVisits": 20, "hitRate": 0.0 }),
        );
        provider.respond(
            MetricKind::HitRate,
            "T3",
            json!({ "visitsWithSale": 5, "totalVisits": 10, "hitRate": 50.0 }),
        );

        dashboard
            .refresh(
                MetricKind::HitRate,
                Period::Week,
                &territories(&["T1", "T2", "T3"]),
            )
            .await
            .unwrap();

        let aggregate = dashboard
            .current_aggregate(MetricKind::HitRate, Period::Week)
            .await
            .unwrap();
        let hit_rate = aggregate.get::<HitRateRecord>().unwrap();
        assert_eq!(hit_rate.total_visits, 40);
        assert!((hit_rate.hit_rate - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let (provider, clock, dashboard) = setup();
        provider.respond(
            MetricKind::Coverage,
            "T1",
            json!({ "visitedClients": 8, "targetClients": 10 }),
        );
        provider.respond(
            MetricKind::Coverage,
            "T2",
            json!({ "visitedClients": 2, "targetClients": 10 }),
        );

        let first = dashboard
            .set_territories(territories(&["T1", "T2"]))
            .await
            .unwrap();
        assert!(first.is_success());
        let started = clock.now();

        provider.fail(MetricKind::Coverage, "T2");
        clock.advance(TimeDelta::seconds(301));
        let report = dashboard.refresh_all().await;

        let failures: Vec<MetricKind> = report.failures().map(|(kind, _)| kind).collect();
        assert_eq!(failures, [MetricKind::Coverage]);
        for kind in MetricKind::ALL {
            if kind == MetricKind::Coverage {
                continue;
            }
            assert_eq!(report.outcome(kind), Some(RefreshOutcome::Refreshed));
            let entry = dashboard.current_entry(kind, Period::Today).await.unwrap();
            assert_eq!(entry.computed_at, clock.now());
            assert_eq!(dashboard.last_error(kind), None);
        }

        let coverage = dashboard
            .current_entry(MetricKind::Coverage, Period::Today)
            .await
            .unwrap();
        assert_eq!(coverage.computed_at, started);
        let record = coverage.record::<CoverageRecord>().unwrap();
        assert!((record.coverage_rate - 50.0).abs() < 1e-9);

        let error = dashboard.last_error(MetricKind::Coverage).unwrap();
        assert!(error.contains("connection reset"));

        // The stale value is still shown, without an error banner.
        let tile = dashboard.tile(MetricKind::Coverage).await;
        assert_eq!(tile.error, None);
        assert!((tile.headline().unwrap() - 50.0).abs() < 1e-9);
        assert!(!tile.loading);
    }

    #[tokio::test]
    async fn test_failure_without_cached_value_shows_error() {
        let (provider, _, dashboard) = setup();
        provider.fail(MetricKind::SalesPerVisit, "T1");

        let result = dashboard
            .refresh(MetricKind::SalesPerVisit, Period::Today, &territories(&["T1"]))
            .await;
        assert!(matches!(result, Err(KpiError::Network(_))));
        // Two attempts: the first try and one retry.
        assert_eq!(provider.calls(MetricKind::SalesPerVisit), 2);

        let tile = dashboard.tile(MetricKind::SalesPerVisit).await;
        assert!(tile.is_unavailable());
        assert_eq!(tile.headline(), None);
        assert!(tile.error.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (provider, _, dashboard) = setup();
        provider.fail_times(MetricKind::LinesPerOrder, "T2", 1);

        let outcome = dashboard
            .refresh(
                MetricKind::LinesPerOrder,
                Period::Week,
                &territories(&["T1", "T2"]),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(provider.calls(MetricKind::LinesPerOrder), 3);
        assert_eq!(dashboard.last_error(MetricKind::LinesPerOrder), None);
    }

    #[tokio::test]
    async fn test_slow_territory_times_out() {
        let provider = Arc::new(ScriptedProvider::delayed(Duration::from_millis(500)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dashboard = dashboard_with(
            provider.clone(),
            clock,
            config()
                .with_fetch_timeout(Duration::from_millis(20))
                .with_max_attempts(1),
        );

        let result = dashboard
            .refresh(MetricKind::VisitFrequency, Period::Week, &territories(&["T1"]))
            .await;
        assert!(matches!(result, Err(KpiError::Timeout(_))));
        assert!(!dashboard.is_loading(MetricKind::VisitFrequency));
        assert!(
            dashboard
                .current_aggregate(MetricKind::VisitFrequency, Period::Week)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let (open, gate) = watch::channel(false);
        let provider = Arc::new(ScriptedProvider::gated(Period::Today, gate));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dashboard = dashboard_with(
            provider.clone(),
            clock,
            config().with_default_period(Period::Week),
        );
        dashboard.set_territories(territories(&["T1", "T2"])).await;

        let pending = dashboard.select_period(Period::Today);
        let switch = async {
            while provider.gated.load(Ordering::SeqCst) < 12 {
                tokio::task::yield_now().await;
            }
            assert!(dashboard.is_loading(MetricKind::Revenue));
            let report = dashboard.select_period(Period::Month).await;
            open.send(true).unwrap();
            report
        };
        let (today, month) = tokio::join!(pending, switch);

        for kind in MetricKind::ALL {
            assert_eq!(today.outcome(kind), Some(RefreshOutcome::Discarded));
            assert_eq!(month.outcome(kind), Some(RefreshOutcome::Refreshed));
            assert!(dashboard.current_entry(kind, Period::Today).await.is_none());
            assert!(dashboard.current_entry(kind, Period::Month).await.is_some());
            assert!(!dashboard.is_loading(kind));
        }
        assert_eq!(dashboard.selected_period(), Period::Month);
    }

    #[tokio::test]
    async fn test_week_revenue_end_to_end() {
        let (provider, _, dashboard) = setup();
        provider.respond(
            MetricKind::Revenue,
            "T1",
            json!({
                "value": 1000.0,
                "orderCount": 10,
                "taxAmount": 200.0,
                "amountHt": 1000.0,
                "amountTtc": 1200.0,
                "startDate": "2024-03-04",
                "endDate": "2024-03-10"
            }),
        );
        provider.respond(
            MetricKind::Revenue,
            "T2",
            json!({ "value": 500.0, "orderCount": 5 }),
        );

        dashboard.set_territories(territories(&["T1", "T2"])).await;
        let report = dashboard.select_period(Period::Week).await;
        assert!(report.is_success());
        assert_eq!(report.period, Period::Week);

        let aggregate = dashboard
            .current_aggregate(MetricKind::Revenue, Period::Week)
            .await
            .unwrap();
        let revenue = aggregate.get::<RevenueRecord>().unwrap();
        assert_eq!(revenue.value, 1500.0);
        assert_eq!(revenue.order_count, 15);
        assert_eq!(revenue.window.period, Some(Period::Week));
        assert_eq!(
            revenue.window.start_date,
            chrono::NaiveDate::from_ymd_opt(2024, 3, 4)
        );

        assert_eq!(dashboard.dropsize(Period::Week).await, Some(100.0));
        assert_eq!(dashboard.dropsize(Period::Month).await, None);
    }

    #[tokio::test]
    async fn test_derived_metrics_follow_cache() {
        let (provider, _, dashboard) = setup();
        provider.respond(MetricKind::Revenue, "T1", json!({ "value": 900.0 }));
        provider.respond(MetricKind::HitRate, "T1", json!({ "totalVisits": 30 }));

        dashboard.set_territories(territories(&["T1"])).await;
        let derived = dashboard.derived(Period::Today).await;
        assert_eq!(derived.dropsize, None);
        assert_eq!(derived.revenue_per_visit, Some(30.0));
    }

    #[tokio::test]
    async fn test_territory_changes_retrigger() {
        let (provider, _, dashboard) = setup();
        assert!(dashboard.territories().is_none());

        let report = dashboard.set_territories(territories(&["T1", "T2"])).await;
        assert!(report.is_some());
        assert_eq!(provider.total_calls(), 12);

        let unchanged = dashboard.set_territories(territories(&["T2", "T1"])).await;
        assert!(unchanged.is_none());
        assert_eq!(provider.total_calls(), 12);

        let reassigned = dashboard
            .sync_territories(&FixedTerritories(vec!["T1", "T3"]))
            .await
            .unwrap();
        assert!(reassigned.unwrap().is_success());
        assert_eq!(provider.total_calls(), 24);
        assert_eq!(
            dashboard.territories().unwrap().scope_key().as_str(),
            "T1,T3"
        );
    }

    #[tokio::test]
    async fn test_period_switch_reuses_cache() {
        let (provider, _, dashboard) = setup();
        dashboard.set_territories(territories(&["T1"])).await;
        dashboard.select_period(Period::Quarter).await;
        assert_eq!(provider.total_calls(), 12);

        let back = dashboard.select_period(Period::Today).await;
        assert_eq!(back.outcome(MetricKind::Revenue), Some(RefreshOutcome::CacheHit));
        assert_eq!(provider.total_calls(), 12);
    }

    #[tokio::test]
    async fn test_clear_resets_session() {
        let (provider, _, dashboard) = setup();
        provider.fail(MetricKind::Coverage, "T1");
        dashboard.set_territories(territories(&["T1"])).await;
        assert!(dashboard.last_error(MetricKind::Coverage).is_some());

        dashboard.clear().await;
        assert!(dashboard.cache().is_empty().await);
        assert!(dashboard.territories().is_none());
        assert_eq!(dashboard.last_error(MetricKind::Coverage), None);
        assert_eq!(dashboard.selected_period(), Period::Today);
    }

    #[tokio::test]
    async fn test_reassigned_scope_hides_previous_rollup() {
        let (provider, _, dashboard) = setup();
        provider.respond(MetricKind::Revenue, "T1", json!({ "value": 600.0, "orderCount": 6 }));
        provider.respond(MetricKind::Revenue, "T2", json!({ "value": 400.0, "orderCount": 4 }));
        dashboard.set_territories(territories(&["T1", "T2"])).await;
        assert_eq!(dashboard.tile(MetricKind::Revenue).await.headline(), Some(1000.0));

        provider.fail(MetricKind::Revenue, "T3");
        let report = dashboard.set_territories(territories(&["T3"])).await.unwrap();
        assert!(report.outcome(MetricKind::Revenue).is_none());

        let tile = dashboard.tile(MetricKind::Revenue).await;
        assert!(tile.is_unavailable());
        assert_eq!(tile.computed_at, None);
        assert!(tile.error.unwrap().contains("T3"));
        assert!(
            dashboard
                .current_aggregate(MetricKind::Revenue, Period::Today)
                .await
                .is_none()
        );
        assert_eq!(dashboard.dropsize(Period::Today).await, None);

        // The old rollup is still cached for its own scope.
        let entry = dashboard
            .current_entry(MetricKind::Revenue, Period::Today)
            .await
            .unwrap();
        assert_eq!(entry.scope_key.as_str(), "T1,T2");

        // Other metrics refreshed for the new scope and still show.
        assert!(!dashboard.tile(MetricKind::Coverage).await.is_unavailable());
    }

    #[tokio::test]
    async fn test_clear_keeps_in_flight_loading() {
        let (open, gate) = watch::channel(false);
        let provider = Arc::new(ScriptedProvider::gated(Period::Today, gate));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dashboard = dashboard_with(provider.clone(), clock, config());

        let pending = dashboard.set_territories(territories(&["T1"]));
        let teardown = async {
            while provider.gated.load(Ordering::SeqCst) < 6 {
                tokio::task::yield_now().await;
            }
            dashboard.clear().await;
            let loading = dashboard.is_loading(MetricKind::Revenue);
            open.send(true).unwrap();
            loading
        };
        let (report, loading_after_clear) = tokio::join!(pending, teardown);

        assert!(loading_after_clear);
        let report = report.unwrap();
        assert_eq!(
            report.outcome(MetricKind::Revenue),
            Some(RefreshOutcome::Discarded)
        );
        for kind in MetricKind::ALL {
            assert!(!dashboard.is_loading(kind));
        }
        assert!(dashboard.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_open_rehydrates_cache() {
        let storage = Arc::new(InMemoryBlobStore::new());
        let provider = Arc::new(ScriptedProvider::default());

        let first = KpiDashboard::open(provider.clone(), storage.clone(), config()).await;
        first.set_territories(territories(&["T1"])).await;
        assert_eq!(provider.total_calls(), 6);

        let second = KpiDashboard::open(provider.clone(), storage, config()).await;
        let report = second.set_territories(territories(&["T1"])).await.unwrap();
        assert_eq!(report.outcome(MetricKind::Revenue), Some(RefreshOutcome::CacheHit));
        assert_eq!(provider.total_calls(), 6);
    }
}
