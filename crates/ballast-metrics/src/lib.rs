//! ballast-metrics — Prometheus query client for node load signals.
//!
//! The annotator resolves a (metric, node identity) pair into a numeric
//! sample through this crate:
//!
//! ```text
//! PromClient
//!   ├── query(metric, id)              ← tries both identifier dialects
//!   │   ├── metric{instance=~"<id>"} /100
//!   │   └── metric{instance=~"<id>:.+"} /100
//!   └── instant query, 10s timeout, basic/bearer auth
//! ```
//!
//! Samples are normalised before use: non-vector results fail, negative
//! and NaN values clamp to zero, and the survivor is formatted with five
//! fractional digits. An empty vector yields an empty string so callers
//! can fall through to their next identifier.

pub mod client;
pub mod error;

pub use client::{Auth, MetricsClient, PromClient, DEFAULT_QUERY_TIMEOUT};
pub use error::{MetricsError, MetricsResult};
