//! # compass-drivers
//!
//! Telemetry drivers for Compass.
//!
//! This crate provides:
//! - The [`Driver`] trait every telemetry backend implements
//! - A lazily loading [`DriverRegistry`] keyed by type identifier
//! - The built-in Prometheus driver
//! - [`MockDriver`] for tests

mod driver;
pub mod prometheus;
mod registry;

pub use driver::{Driver, DriverError, MockDriver, QueryResult};
pub use prometheus::{PrometheusConfig, PrometheusDriver, PROMETHEUS_KIND};
pub use registry::{DriverFactory, DriverRegistry};
