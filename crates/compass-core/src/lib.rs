//! # compass-core
//!
//! Core types for the Compass metric-evaluation engine.
//!
//! Compass watches the metrics of a deployment circle (a canary cohort, the
//! stable fleet, ...) and decides when a metric has crossed its threshold.
//! That decision feeds the promotion/rollback logic of a progressive-delivery
//! pipeline.
//!
//! ## Model
//!
//! - A [`DataSource`] is a workspace-scoped connection to a telemetry backend
//! - A [`MetricsGroup`] owns the [`Metric`]s evaluated for one circle
//! - Every metric owns exactly one [`MetricExecution`] carrying its last value
//!   and its [`ExecutionStatus`]
//! - A [`Condition`] compares an observed value with the metric's threshold

pub mod config;
mod error;
mod types;
mod validation;

pub use config::CompassConfig;
pub use error::{CompassError, Result};
pub use types::*;
pub use validation::{FieldViolation, ValidationErrors};
