//! Error types for KPI operations.
//!
//! This module defines [`KpiError`] which covers all error cases that can occur
//! when fetching, decoding, aggregating, or persisting KPI data.

use thiserror::Error;

/// Errors that can occur during KPI operations.
#[derive(Error, Debug)]
pub enum KpiError {
    /// Network-related errors (connection failures, resets, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// The KPI endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// A territory fetch did not complete within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Error decoding a KPI payload or persisted cache contents.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error interacting with durable storage.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A reducer was given no records to fold.
    #[error("Cannot aggregate {0}: no territory records")]
    EmptyScope(&'static str),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The endpoint rejected the session credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl KpiError {
    /// Returns true if the failure is transient and the request may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias using [`KpiError`].
pub type Result<T> = std::result::Result<T, KpiError>;
