//! Metrics client error types.

use thiserror::Error;

/// Errors from querying the monitoring backend.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("request to metrics backend failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics backend returned error status: {0}")]
    Api(String),

    #[error("unexpected result type: {0}")]
    UnexpectedResultType(String),

    #[error("unexpected warnings: {0:?}")]
    Warnings(Vec<String>),

    #[error("no samples for metric {metric} with identifier {identifier}")]
    Empty { metric: String, identifier: String },
}

pub type MetricsResult<T> = Result<T, MetricsError>;
