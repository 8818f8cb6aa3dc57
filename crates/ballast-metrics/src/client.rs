//! Instant-query client for the Prometheus HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{MetricsError, MetricsResult};

/// Upper bound for a single instant query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication against the metrics backend, fixed for the client's
/// lifetime.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

/// Resolves a metric name and a node identity into a numeric sample.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Instant query for `metric` scoped to `identifier` (a node internal
    /// IP or node name). Both identifier dialects are tried; the first
    /// non-empty result wins.
    async fn query(&self, metric: &str, identifier: &str) -> MetricsResult<String>;
}

/// HTTP client for `<address>/api/v1/query`.
pub struct PromClient {
    address: String,
    http: reqwest::Client,
    auth: Auth,
}

impl PromClient {
    pub fn new(address: impl Into<String>) -> MetricsResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_QUERY_TIMEOUT)
            .build()?;
        Ok(Self {
            address: address.into().trim_end_matches('/').to_string(),
            http,
            auth: Auth::None,
        })
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    async fn instant_query(&self, selector: &str) -> MetricsResult<String> {
        debug!(query = selector, "querying metrics backend");

        let url = format!("{}/api/v1/query", self.address);
        let mut request = self.http.get(&url).query(&[("query", selector)]);
        request = match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        match parse_query_response(&body) {
            Ok(value) => Ok(value),
            Err(MetricsError::Api(msg)) => Err(MetricsError::Api(msg)),
            Err(err) if !status.is_success() => {
                Err(MetricsError::Api(format!("http status {status}: {err}")))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl MetricsClient for PromClient {
    async fn query(&self, metric: &str, identifier: &str) -> MetricsResult<String> {
        // The instance label may or may not carry a scrape port, so the
        // bare identifier is tried first, then the port-suffixed form.
        let selectors = [
            format!("{metric}{{instance=~\"{identifier}\"}} /100"),
            format!("{metric}{{instance=~\"{identifier}:.+\"}} /100"),
        ];

        let mut last_err = None;
        for selector in &selectors {
            match self.instant_query(selector).await {
                Ok(value) if !value.is_empty() => return Ok(value),
                Ok(_) => {}
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or(MetricsError::Empty {
            metric: metric.to_string(),
            identifier: identifier.to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    /// `[unix_seconds, "<value>"]`
    value: (f64, String),
}

/// Decode an instant-query response body into a normalised value.
///
/// Empty vectors yield an empty string so the caller can try its next
/// identifier dialect.
fn parse_query_response(body: &str) -> MetricsResult<String> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| MetricsError::UnexpectedResultType(e.to_string()))?;

    if response.status != "success" {
        return Err(MetricsError::Api(
            response.error.unwrap_or_else(|| response.status.clone()),
        ));
    }
    if let Some(warnings) = response.warnings {
        if !warnings.is_empty() {
            return Err(MetricsError::Warnings(warnings));
        }
    }
    let data = response
        .data
        .ok_or_else(|| MetricsError::Api("missing response data".to_string()))?;
    if data.result_type != "vector" {
        return Err(MetricsError::UnexpectedResultType(data.result_type));
    }

    let mut value = String::new();
    for sample in &data.result {
        let mut parsed: f64 = sample.value.1.parse().unwrap_or(f64::NAN);
        if parsed < 0.0 || parsed.is_nan() {
            parsed = 0.0;
        }
        value = format!("{parsed:.5}");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_body(values: &[&str]) -> String {
        let samples: Vec<String> = values
            .iter()
            .map(|v| format!(r#"{{"metric":{{}},"value":[1700000000,"{v}"]}}"#))
            .collect();
        format!(
            r#"{{"status":"success","data":{{"resultType":"vector","result":[{}]}}}}"#,
            samples.join(",")
        )
    }

    #[test]
    fn parses_vector_sample() {
        let value = parse_query_response(&vector_body(&["0.321456789"])).unwrap();
        assert_eq!(value, "0.32146");
    }

    #[test]
    fn empty_vector_yields_empty_string() {
        let value = parse_query_response(&vector_body(&[])).unwrap();
        assert_eq!(value, "");
    }

    #[test]
    fn clamps_negative_and_nan_samples() {
        assert_eq!(parse_query_response(&vector_body(&["-0.5"])).unwrap(), "0.00000");
        assert_eq!(parse_query_response(&vector_body(&["NaN"])).unwrap(), "0.00000");
    }

    #[test]
    fn last_sample_wins() {
        let value = parse_query_response(&vector_body(&["0.1", "0.2"])).unwrap();
        assert_eq!(value, "0.20000");
    }

    #[test]
    fn rejects_non_vector_results() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        assert!(matches!(
            parse_query_response(body),
            Err(MetricsError::UnexpectedResultType(t)) if t == "matrix"
        ));
    }

    #[test]
    fn surfaces_api_errors() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        assert!(matches!(
            parse_query_response(body),
            Err(MetricsError::Api(msg)) if msg == "parse error"
        ));
    }

    #[test]
    fn surfaces_warnings() {
        let body = r#"{"status":"success","warnings":["partial data"],"data":{"resultType":"vector","result":[]}}"#;
        assert!(matches!(
            parse_query_response(body),
            Err(MetricsError::Warnings(w)) if w == vec!["partial data".to_string()]
        ));
    }

    #[test]
    fn five_decimal_formatting() {
        let value = parse_query_response(&vector_body(&["1"])).unwrap();
        assert_eq!(value, "1.00000");
    }
}
