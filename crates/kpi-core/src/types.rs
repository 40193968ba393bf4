//! Core data types for territory scopes and KPI windows.
//!
//! This module defines the fundamental data structures:
//!
//! - [`TerritoryId`] - Territory identifier
//! - [`TerritorySet`] - Ordered territories owned by a manager
//! - [`ScopeKey`] - Canonical cache identity of a territory set
//! - [`Window`] - Period and date range a KPI record covers

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::period::Period;

/// A territory identifier.
///
/// Identifiers are trimmed of surrounding whitespace on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerritoryId(String);

impl TerritoryId {
    /// Creates a new territory identifier.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.len() == s.len() {
            Self(s)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerritoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TerritoryId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for TerritoryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TerritoryId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Canonical identity of a territory set, used as the cache scope.
///
/// Built from the sorted territory identifiers, so two sets with the same
/// members in a different order share a key. Separators and escapes inside an
/// identifier are escaped with [`ScopeKey::ESCAPE`], so distinct sets never
/// share a key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Separator between identifiers in the canonical key.
    pub const SEPARATOR: char = ',';

    /// Escape character for separators inside an identifier.
    pub const ESCAPE: char = '\\';

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The ordered territories a manager's rollup spans.
///
/// Duplicates are dropped on insertion, keeping the first occurrence, so a
/// territory is never fetched or summed twice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerritorySet {
    territories: Vec<TerritoryId>,
}

impl TerritorySet {
    /// Creates an empty territory set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            territories: Vec::new(),
        }
    }

    /// Adds a territory if it is not already present.
    pub fn push(&mut self, territory: TerritoryId) {
        if !self.territories.contains(&territory) {
            self.territories.push(territory);
        }
    }

    /// Returns the number of territories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.territories.len()
    }

    /// Returns true if the set has no territories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.territories.is_empty()
    }

    /// Returns an iterator over the territories in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TerritoryId> {
        self.territories.iter()
    }

    /// Returns the canonical cache identity of this set.
    #[must_use]
    pub fn scope_key(&self) -> ScopeKey {
        let mut ids: Vec<&str> = self.territories.iter().map(TerritoryId::as_str).collect();
        ids.sort_unstable();
        let mut key = String::with_capacity(ids.iter().map(|id| id.len() + 1).sum());
        for (i, id) in ids.into_iter().enumerate() {
            if i > 0 {
                key.push(ScopeKey::SEPARATOR);
            }
            for c in id.chars() {
                if c == ScopeKey::SEPARATOR || c == ScopeKey::ESCAPE {
                    key.push(ScopeKey::ESCAPE);
                }
                key.push(c);
            }
        }
        ScopeKey(key)
    }

    /// Returns true if both sets cover the same territories, ignoring order.
    #[must_use]
    pub fn same_scope(&self, other: &Self) -> bool {
        self.scope_key() == other.scope_key()
    }
}

impl<T: Into<TerritoryId>> FromIterator<T> for TerritorySet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for territory in iter {
            set.push(territory.into());
        }
        set
    }
}

impl<'a> IntoIterator for &'a TerritorySet {
    type Item = &'a TerritoryId;
    type IntoIter = std::slice::Iter<'a, TerritoryId>;

    fn into_iter(self) -> Self::IntoIter {
        self.territories.iter()
    }
}

/// Period and date range a KPI record covers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    /// Period the record was computed for.
    #[serde(default)]
    pub period: Option<Period>,
    /// First day of the window.
    #[serde(default, deserialize_with = "lenient_date")]
    pub start_date: Option<NaiveDate>,
    /// Last day of the window.
    #[serde(default, deserialize_with = "lenient_date")]
    pub end_date: Option<NaiveDate>,
}

impl Window {
    /// Creates a window for a period with no date range.
    #[must_use]
    pub const fn for_period(period: Period) -> Self {
        Self {
            period: Some(period),
            start_date: None,
            end_date: None,
        }
    }

    /// Sets the date range.
    #[must_use]
    pub const fn with_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }
}

/// Deserializes a window bound from a plain date or an ISO-8601 timestamp.
///
/// Timestamps keep their date part; anything else unreadable becomes `None`.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_str).and_then(parse_date))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Deserializes a numeric field, mapping an explicit `null` to zero.
pub(crate) fn zero_if_null<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
