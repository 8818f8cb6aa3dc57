//! Annotator error types.

use ballast_metrics::MetricsError;
use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors from syncing a single node key.
#[derive(Debug, Error)]
pub enum AnnotatorError {
    #[error("invalid sync key: {0:?}")]
    InvalidKey(String),

    #[error("node {0} no longer exists")]
    NodeGone(String),

    #[error("failed to fetch metric {metric} for node {node}: {source}")]
    Metric {
        node: String,
        metric: String,
        #[source]
        source: MetricsError,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl AnnotatorError {
    /// Terminal errors drop the key; everything else retries with
    /// backoff.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnnotatorError::InvalidKey(_)
                | AnnotatorError::NodeGone(_)
                | AnnotatorError::Cluster(ClusterError::Permanent(_))
        )
    }
}
