//! Instant queries against the metrics backend
//!
//! Analytics read through [`MetricsQuery`] so the same code works against a
//! remote Prometheus server or the in-process registry.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::store::MetricsStore;
use crate::{InfraError, Result};

/// One element of an instant vector
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySample {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

/// PromQL instant query
#[async_trait]
pub trait MetricsQuery: Send + Sync {
    async fn query(&self, promql: &str) -> Result<Vec<QuerySample>>;
}

lazy_static! {
    static ref SUM_QUERY: Regex =
        Regex::new(r"^\s*sum\(\s*([a-zA-Z_:][a-zA-Z0-9_:]*)\s*(?:\{([^}]*)\})?\s*\)\s*$").unwrap();
    static ref MATCHER: Regex =
        Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*"((?:[^"\\]|\\.)*)""#).unwrap();
}

/// Evaluates `sum(metric{label="value",...})` against the local registry.
///
/// Queries pinned to a past instant (`@ <ts>`) have no history to read from
/// and return an empty vector.
pub struct LocalMetricsQuery {
    store: Arc<MetricsStore>,
}

impl LocalMetricsQuery {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self { store }
    }

    fn evaluate(&self, promql: &str) -> Result<Vec<QuerySample>> {
        if promql.contains('@') {
            debug!(query = promql, "No history for pinned query");
            return Ok(Vec::new());
        }

        let caps = SUM_QUERY
            .captures(promql)
            .ok_or_else(|| InfraError::query(format!("unsupported query: {}", promql)))?;
        let metric = &caps[1];
        let matchers: Vec<(String, String)> = caps
            .get(2)
            .map(|m| {
                MATCHER
                    .captures_iter(m.as_str())
                    .map(|c| (c[1].to_string(), c[2].replace("\\\"", "\"")))
                    .collect()
            })
            .unwrap_or_default();

        let matched: Vec<f64> = self
            .store
            .samples()
            .into_iter()
            .filter(|s| s.name == metric)
            .filter(|s| matchers.iter().all(|(k, v)| s.label(k) == Some(v.as_str())))
            .map(|s| s.value)
            .collect();

        if matched.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![QuerySample {
            labels: HashMap::new(),
            value: matched.iter().sum(),
        }])
    }
}

#[async_trait]
impl MetricsQuery for LocalMetricsQuery {
    async fn query(&self, promql: &str) -> Result<Vec<QuerySample>> {
        self.evaluate(promql)
    }
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSeries>,
}

#[derive(Debug, Deserialize)]
struct PromSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[unix_ts, "value"]`
    value: (f64, String),
}

/// Prometheus HTTP API client (`GET /api/v1/query`)
pub struct PrometheusQuery {
    client: Client,
    query_url: String,
}

impl PrometheusQuery {
    pub fn new(query_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            query_url: query_url.into(),
        })
    }
}

#[async_trait]
impl MetricsQuery for PrometheusQuery {
    async fn query(&self, promql: &str) -> Result<Vec<QuerySample>> {
        debug!(query = promql, "Running Prometheus query");
        let response = self
            .client
            .get(&self.query_url)
            .query(&[("query", promql)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::query(format!("HTTP {}", status)));
        }

        let body: PromResponse = response.json().await?;
        if body.status != "success" {
            return Err(InfraError::query(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        body.data
            .map(|d| d.result)
            .unwrap_or_default()
            .into_iter()
            .map(|series| {
                let value = series
                    .value
                    .1
                    .parse::<f64>()
                    .map_err(|e| InfraError::query(format!("bad sample value: {}", e)))?;
                Ok(QuerySample {
                    labels: series.metric,
                    value,
                })
            })
            .collect()
    }
}
