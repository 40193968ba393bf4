#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/kpi/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! HTTP client for the per-territory KPI endpoint.
//!
//! This crate implements the kpi-core provider traits against the dashboard
//! REST API.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kpi_core::{KpiProvider, KpiRecord, MetricKind, Period, RevenueRecord, TerritoryId};
//! use kpi_http::HttpKpiProvider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = HttpKpiProvider::new("https://sfa.example.com/api")
//!         .with_bearer_token("session-token");
//!
//!     let territory = TerritoryId::new("T1");
//!     let payload = provider.fetch_kpi(MetricKind::Revenue, &territory, Period::Week).await?;
//!     let revenue = RevenueRecord::decode(payload, Period::Week)?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use kpi_core::{
    KpiError, KpiProvider, MetricKind, Period, Result, TerritoryId, TerritorySet, TerritorySource,
};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;

/// Path segment of the KPI endpoint.
const KPI_PATH: &str = "kpis";

/// Path of the endpoint listing the current manager's territories.
const TERRITORIES_PATH: &str = "territories/mine";

/// KPI provider backed by the dashboard REST API.
///
/// Provides access to:
/// - Per-territory KPI payloads for the six metric kinds
/// - The territories owned by the authenticated manager
#[derive(Clone)]
pub struct HttpKpiProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl fmt::Debug for HttpKpiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpKpiProvider")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpKpiProvider {
    /// Create a new provider for the API rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a new provider with a custom HTTP client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token: None,
        }
    }

    /// Authenticate requests with a bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the API root this provider talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the query URL for one `(metric, territory, period)`.
    fn kpi_url(&self, kind: MetricKind, territory: &TerritoryId, period: Period) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}/{KPI_PATH}/{}", self.base_url, kind.as_str()),
            &[
                ("period", period.as_str()),
                ("territoryId", territory.as_str()),
            ],
        )
        .map_err(|e| KpiError::InvalidParameter(format!("{}: {e}", self.base_url)))
    }

    /// Make a GET request and parse the JSON response.
    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("KPI request: {}", url.path());

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KpiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(KpiError::Unauthorized(status.to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KpiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| KpiError::Network(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| KpiError::Parse(format!("{e}: {text}")))
    }
}

#[async_trait]
impl KpiProvider for HttpKpiProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_kpi(
        &self,
        kind: MetricKind,
        territory: &TerritoryId,
        period: Period,
    ) -> Result<serde_json::Value> {
        let url = self.kpi_url(kind, territory, period)?;
        let payload: serde_json::Value = self.get(url).await?;
        Ok(empty_if_null(payload))
    }
}

#[async_trait]
impl TerritorySource for HttpKpiProvider {
    async fn territories(&self) -> Result<TerritorySet> {
        let url = Url::parse(&format!("{}/{TERRITORIES_PATH}", self.base_url))
            .map_err(|e| KpiError::InvalidParameter(format!("{}: {e}", self.base_url)))?;
        let refs: Vec<TerritoryRef> = self.get(url).await?;
        Ok(refs.into_iter().map(TerritoryRef::into_id).collect())
    }
}

/// A `null` body carries no counters; treat it like an empty object so every
/// field decodes to zero.
fn empty_if_null(payload: serde_json::Value) -> serde_json::Value {
    if payload.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        payload
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Territory entry: either a bare identifier or an object carrying one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TerritoryRef {
    Id(String),
    Object { id: String },
}

impl TerritoryRef {
    fn into_id(self) -> TerritoryId {
        match self {
            Self::Id(id) | Self::Object { id } => TerritoryId::new(id),
        }
    }
}
