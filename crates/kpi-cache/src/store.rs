//! The KPI cache store.
//!
//! Holds, per metric kind and period, the last aggregate computed for a
//! territory scope. Entries are replaced whole and handed out as `Arc`s, so a
//! reader never observes a partially written entry. Every mutation is written
//! through to a [`BlobStore`] before returning; storage failures are logged and
//! the store keeps working from memory.

use chrono::{DateTime, TimeDelta, Utc};
use kpi_core::{
    Aggregate, BlobStore, Clock, KpiError, KpiRecord, MetricKind, Period, Result, ScopeKey,
    SystemClock,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Default key the store persists under.
pub const STORAGE_KEY: &str = "kpi-dashboard-cache";

/// Version of the persisted layout; other versions are discarded on load.
const FORMAT_VERSION: u32 = 1;

/// A cached aggregate with the time and scope it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Period bucket.
    pub period: Period,
    /// Territory scope the aggregate covers.
    pub scope_key: ScopeKey,
    /// When the aggregate was written.
    pub computed_at: DateTime<Utc>,
    /// The rolled-up value.
    pub aggregate: Aggregate,
}

impl CacheEntry {
    /// Returns the metric kind of the cached aggregate.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.aggregate.kind()
    }

    /// Borrows the typed record if the entry is of kind `R::KIND`.
    #[must_use]
    pub fn record<R: KpiRecord>(&self) -> Option<&R> {
        self.aggregate.get::<R>()
    }

    /// Returns true if the entry is younger than `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.computed_at);
        age < TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX)
    }
}

type EntryMap = HashMap<(MetricKind, Period), Arc<CacheEntry>>;

#[derive(Serialize)]
struct PersistedRef<'a> {
    version: u32,
    entries: Vec<&'a CacheEntry>,
}

#[derive(Deserialize)]
struct Persisted {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Write-through cache of KPI aggregates keyed by `(metric, period)`.
pub struct CacheStore {
    entries: RwLock<EntryMap>,
    backend: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    key: String,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend)
            .field("clock", &self.clock)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Create an empty store persisting to `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            backend,
            clock: Arc::new(SystemClock),
            key: STORAGE_KEY.to_string(),
        }
    }

    /// Use `clock` for timestamps and freshness checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist under `key` instead of [`STORAGE_KEY`].
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Create a store and rehydrate it from `backend`.
    pub async fn open(backend: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        let store = Self::new(backend).with_clock(clock);
        store.rehydrate().await;
        store
    }

    /// Returns the clock the store stamps entries with.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Loads persisted entries, replacing the in-memory contents.
    ///
    /// Unreadable or incompatible contents are logged and ignored. Returns the
    /// number of entries restored.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn rehydrate(&self) -> usize {
        let restored = match self.load_persisted().await {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                debug!("No persisted KPI cache");
                return 0;
            }
            Err(e) => {
                warn!(error = %e, "Failed to restore KPI cache, starting empty");
                return 0;
            }
        };

        let count = restored.len();
        *self.entries.write().await = restored;
        debug!("Restored {} cached aggregates", count);
        count
    }

    async fn load_persisted(&self) -> Result<Option<EntryMap>> {
        let Some(bytes) = self.backend.load(&self.key).await? else {
            return Ok(None);
        };
        let persisted: Persisted =
            serde_json::from_slice(&bytes).map_err(|e| KpiError::Parse(e.to_string()))?;
        if persisted.version != FORMAT_VERSION {
            return Err(KpiError::Parse(format!(
                "Unsupported cache format version {}",
                persisted.version
            )));
        }

        let entries = persisted
            .entries
            .into_iter()
            .map(|entry| ((entry.kind(), entry.period), Arc::new(entry)))
            .collect();
        Ok(Some(entries))
    }

    /// Returns the entry for `(kind, period)`, if any.
    pub async fn get(&self, kind: MetricKind, period: Period) -> Option<Arc<CacheEntry>> {
        self.entries.read().await.get(&(kind, period)).cloned()
    }

    /// Stores `aggregate` for `period` and `scope_key`, replacing any previous
    /// entry of the same metric kind and period.
    ///
    /// The entry is stamped with the current time and persisted before this
    /// returns.
    #[instrument(skip(self, aggregate), fields(kind = %aggregate.kind()))]
    pub async fn set(
        &self,
        period: Period,
        scope_key: ScopeKey,
        aggregate: Aggregate,
    ) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            period,
            scope_key,
            computed_at: self.clock.now(),
            aggregate,
        });

        let mut entries = self.entries.write().await;
        entries.insert((entry.kind(), period), Arc::clone(&entry));
        self.persist(&entries).await;
        debug!("Cached aggregate");
        entry
    }

    /// Returns true if an entry exists for `(kind, period)`, is younger than
    /// `ttl`, and was computed for `scope_key`.
    pub async fn is_valid(
        &self,
        kind: MetricKind,
        period: Period,
        scope_key: &ScopeKey,
        ttl: Duration,
    ) -> bool {
        let Some(entry) = self.get(kind, period).await else {
            return false;
        };
        &entry.scope_key == scope_key && entry.is_fresh(self.clock.now(), ttl)
    }

    /// Removes entries older than `ttl`.
    ///
    /// Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn invalidate_stale(&self, ttl: Duration) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now, ttl));
        let removed = before - entries.len();

        if removed > 0 {
            self.persist(&entries).await;
            debug!("Invalidated {} stale cache entries", removed);
        }
        removed
    }

    /// Empties the store and erases the persisted copy.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        if let Err(e) = self.backend.remove(&self.key).await {
            warn!(error = %e, "Failed to erase persisted KPI cache");
        }
        debug!("Cleared all cache entries");
    }

    /// Returns the number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self, entries: &EntryMap) {
        let snapshot = PersistedRef {
            version: FORMAT_VERSION,
            entries: entries.values().map(|entry| &**entry).collect(),
        };
        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize KPI cache");
                return;
            }
        };
        if let Err(e) = self.backend.store(&self.key, &bytes).await {
            warn!(error = %e, "Failed to persist KPI cache, continuing in memory");
        }
    }
}
