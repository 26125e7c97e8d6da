//! Built-in Prometheus driver
//!
//! Runs instant queries against the HTTP API (`/api/v1/query`). When a metric
//! carries no raw query, the PromQL expression is built from its metric name,
//! filters, and group-by fields.

use async_trait::async_trait;
use compass_core::{MetricFilter, QuerySpec};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::driver::{Driver, DriverError, QueryResult};

pub const PROMETHEUS_KIND: &str = "prometheus";

/// Connection configuration of a Prometheus data source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusConfig {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl PrometheusConfig {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DriverError> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|e| DriverError::Connection(e.to_string()))?;
        if config.url.trim().is_empty() {
            return Err(DriverError::Connection("url is required".to_string()));
        }
        Ok(config)
    }

    fn query_endpoint(&self) -> String {
        format!("{}/api/v1/query", self.url.trim_end_matches('/'))
    }
}

pub struct PrometheusDriver {
    client: reqwest::Client,
}

impl PrometheusDriver {
    pub fn new(timeout: Duration) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Driver for PrometheusDriver {
    fn kind(&self) -> &str {
        PROMETHEUS_KIND
    }

    #[instrument(skip_all)]
    async fn query(&self, connection: &[u8], spec: &[u8]) -> Result<QueryResult, DriverError> {
        let config = PrometheusConfig::from_bytes(connection)?;
        let spec: QuerySpec =
            serde_json::from_slice(spec).map_err(|e| DriverError::Spec(e.to_string()))?;
        let expression = build_expression(&spec)?;

        debug!("Querying {} for {}", config.url, expression);

        let mut request = self
            .client
            .get(config.query_endpoint())
            .query(&[("query", expression.as_str())]);
        if let Some(token) = config.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DriverError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DriverError::Request(format!("failed to read response: {}", e)))?;

        match serde_json::from_str::<Value>(&body) {
            Ok(document) => parse_response(&document),
            Err(_) if !status.is_success() => {
                Err(DriverError::Backend(format!("HTTP {}: {}", status, body.trim())))
            }
            Err(e) => Err(DriverError::Decode(e.to_string())),
        }
    }
}

/// PromQL expression for a query spec
pub fn build_expression(spec: &QuerySpec) -> Result<String, DriverError> {
    if !spec.query.trim().is_empty() {
        return Ok(spec.query.clone());
    }

    let metric = spec.metric.trim();
    if metric.is_empty() {
        return Err(DriverError::Spec("metric or query is required".to_string()));
    }

    let mut expression = metric.to_string();
    if !spec.filters.is_empty() {
        let matchers: Vec<String> = spec.filters.iter().map(label_matcher).collect();
        expression.push('{');
        expression.push_str(&matchers.join(","));
        expression.push('}');
    }

    if !spec.group_by.is_empty() {
        expression = format!("sum({}) by ({})", expression, spec.group_by.join(","));
    }

    Ok(expression)
}

fn label_matcher(filter: &MetricFilter) -> String {
    let value = filter.value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{}{}\"{}\"", filter.field, filter.operator.as_str(), value)
}

/// Decode an instant-query response document
pub fn parse_response(document: &Value) -> Result<QueryResult, DriverError> {
    if document.get("status").and_then(Value::as_str) != Some("success") {
        let message = document
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let kind = document
            .get("errorType")
            .and_then(Value::as_str)
            .unwrap_or("error");
        return Err(DriverError::Backend(format!("{}: {}", kind, message)));
    }

    let data = document
        .get("data")
        .ok_or_else(|| DriverError::Decode("missing data".to_string()))?;
    let result_type = data
        .get("resultType")
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::Decode("missing resultType".to_string()))?;
    let result = data
        .get("result")
        .ok_or_else(|| DriverError::Decode("missing result".to_string()))?;

    let sample = match result_type {
        "vector" => result
            .as_array()
            .ok_or_else(|| DriverError::Decode("vector result is not an array".to_string()))?
            .first()
            .ok_or_else(|| DriverError::Backend("no samples".to_string()))?
            .get("value")
            .ok_or_else(|| DriverError::Decode("sample without value".to_string()))?,
        "scalar" => result,
        other => {
            return Err(DriverError::Decode(format!(
                "unsupported result type {}",
                other
            )))
        }
    };

    let value = QueryResult(sample.clone())
        .scalar()
        .ok_or_else(|| DriverError::Decode(format!("non-numeric sample {}", sample)))?;
    Ok(QueryResult::from(value))
}
