//! Driver abstraction and query results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Errors raised by a driver while answering a query
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("invalid connection config: {0}")]
    Connection(String),

    #[error("invalid query spec: {0}")]
    Spec(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("driver unavailable: {0}")]
    Unavailable(String),
}

/// Opaque value returned by a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryResult(pub Value);

impl QueryResult {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Numeric reading of this result, if it has one
    ///
    /// Accepts a number, a numeric string, or an array whose last element is
    /// one of those (series are ordered oldest first).
    pub fn scalar(&self) -> Option<f64> {
        scalar_of(&self.0).filter(|v| v.is_finite())
    }
}

fn scalar_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) => items.last().and_then(scalar_of),
        _ => None,
    }
}

impl From<f64> for QueryResult {
    fn from(value: f64) -> Self {
        Self(Value::from(value))
    }
}

/// A telemetry backend driver
///
/// `connection` is the decrypted data-source configuration and `spec` the
/// serialized [`QuerySpec`](compass_core::QuerySpec), both as JSON bytes.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Type identifier this driver answers to
    fn kind(&self) -> &str;

    async fn query(&self, connection: &[u8], spec: &[u8]) -> Result<QueryResult, DriverError>;
}

/// Scripted driver for testing
///
/// Answers by the `metric` field of the query spec. Tracks how many queries
/// ran and the peak number running at once.
#[derive(Debug, Default)]
pub struct MockDriver {
    kind: String,
    responses: HashMap<String, Result<Value, DriverError>>,
    delays: HashMap<String, Duration>,
    default_delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockDriver {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, metric: &str, value: Value) -> Self {
        self.responses.insert(metric.to_string(), Ok(value));
        self
    }

    pub fn with_error(mut self, metric: &str, error: DriverError) -> Self {
        self.responses.insert(metric.to_string(), Err(error));
        self
    }

    /// Delay every answer for `metric`
    pub fn with_delay_for(mut self, metric: &str, delay: Duration) -> Self {
        self.delays.insert(metric.to_string(), delay);
        self
    }

    /// Delay every answer without a specific delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn query(&self, _connection: &[u8], spec: &[u8]) -> Result<QueryResult, DriverError> {
        let spec: compass_core::QuerySpec =
            serde_json::from_slice(spec).map_err(|e| DriverError::Spec(e.to_string()))?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&spec.metric).copied().or(self.default_delay) {
            tokio::time::sleep(delay).await;
        }

        match self.responses.get(&spec.metric) {
            Some(Ok(value)) => Ok(QueryResult(value.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Err(DriverError::Backend(format!(
                "no mock response for {}",
                spec.metric
            ))),
        }
    }
}
