//! Repository seams between the engine and a storage backend
//!
//! Every backend implements the three entity repositories; [`Store`] is the
//! umbrella trait the engine holds as `Arc<dyn Store>`.
//!
//! Soft-deleted data sources are invisible to every read. Updates are typed:
//! a backend only ever writes the named fields of an operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compass_core::{
    DataSource, Health, Metric, MetricExecution, MetricsGroup, MetricsGroupUpdate, Result,
};
use uuid::Uuid;

#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    async fn insert_data_source(&self, source: &DataSource) -> Result<()>;

    /// `None` when absent or soft-deleted
    async fn find_data_source(&self, id: Uuid) -> Result<Option<DataSource>>;

    /// Live data sources of a workspace, optionally restricted to one health
    async fn list_data_sources(
        &self,
        workspace_id: Uuid,
        health: Option<Health>,
    ) -> Result<Vec<DataSource>>;

    /// Returns `false` when no live data source matched
    async fn set_data_source_health(&self, id: Uuid, health: Health) -> Result<bool>;

    /// Returns `false` when no live data source matched
    async fn soft_delete_data_source(&self, id: Uuid, deleted_at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait MetricsGroupRepository: Send + Sync {
    /// Insert a group with all its metrics and their executions
    async fn insert_metrics_group(&self, group: &MetricsGroup) -> Result<()>;

    async fn list_metrics_groups(&self) -> Result<Vec<MetricsGroup>>;

    /// Group with its metrics (and their executions) populated
    async fn find_metrics_group(&self, id: Uuid) -> Result<Option<MetricsGroup>>;

    async fn update_metrics_group(&self, id: Uuid, update: &MetricsGroupUpdate) -> Result<bool>;

    /// Cascades to the group's metrics and executions
    async fn delete_metrics_group(&self, id: Uuid) -> Result<bool>;

    /// Insert a metric and its execution into an existing group
    async fn insert_metric(&self, metric: &Metric) -> Result<()>;

    async fn find_metric(&self, id: Uuid) -> Result<Option<Metric>>;

    /// Writes the metric's definition fields; its execution is untouched
    async fn update_metric(&self, metric: &Metric) -> Result<bool>;

    /// Cascades to the metric's execution
    async fn delete_metric(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait MetricExecutionRepository: Send + Sync {
    /// All executions in creation order
    async fn list_metric_executions(&self) -> Result<Vec<MetricExecution>>;

    async fn find_metric_execution(&self, metric_id: Uuid) -> Result<Option<MetricExecution>>;

    /// Writes `last_value` and `status`; returns `false` when absent
    async fn update_metric_execution(&self, execution: &MetricExecution) -> Result<bool>;
}

/// A complete storage backend
pub trait Store: DataSourceRepository + MetricsGroupRepository + MetricExecutionRepository {}

impl<T> Store for T where T: DataSourceRepository + MetricsGroupRepository + MetricExecutionRepository
{}
