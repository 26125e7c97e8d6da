//! In-process storage backend
//!
//! Keeps every table in memory behind a single `RwLock`. `close()` simulates
//! a lost connection: every later call fails with a persistence error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compass_core::{
    CompassError, DataSource, Health, Metric, MetricExecution, MetricsGroup, MetricsGroupUpdate,
    Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::repository::{DataSourceRepository, MetricExecutionRepository, MetricsGroupRepository};

#[derive(Default)]
struct Tables {
    data_sources: HashMap<Uuid, DataSource>,
    /// Groups in insertion order, stored without their metrics
    groups: Vec<MetricsGroup>,
    metrics: Vec<Metric>,
    executions: Vec<MetricExecution>,
}

impl Tables {
    fn execution_for(&self, metric_id: Uuid) -> Option<&MetricExecution> {
        self.executions.iter().find(|e| e.metric_id == metric_id)
    }

    fn hydrate(&self, metric: &Metric) -> Metric {
        let mut metric = metric.clone();
        if let Some(execution) = self.execution_for(metric.id) {
            metric.execution = execution.clone();
        }
        metric
    }

    fn hydrate_group(&self, group: &MetricsGroup) -> MetricsGroup {
        let mut group = group.clone();
        group.metrics = self
            .metrics
            .iter()
            .filter(|m| m.metrics_group_id == group.id)
            .map(|m| self.hydrate(m))
            .collect();
        group
    }

    fn remove_metrics(&mut self, keep: impl Fn(&Metric) -> bool) {
        let removed: Vec<Uuid> = self
            .metrics
            .iter()
            .filter(|m| !keep(m))
            .map(|m| m.id)
            .collect();
        self.metrics.retain(|m| keep(m));
        self.executions.retain(|e| !removed.contains(&e.metric_id));
    }
}

/// Storage backend living entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Memory store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CompassError::Persistence("connection is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataSourceRepository for MemoryStore {
    async fn insert_data_source(&self, source: &DataSource) -> Result<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        if tables.data_sources.contains_key(&source.id) {
            return Err(CompassError::Persistence(format!(
                "duplicate data source id {}",
                source.id
            )));
        }
        tables.data_sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn find_data_source(&self, id: Uuid) -> Result<Option<DataSource>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables
            .data_sources
            .get(&id)
            .filter(|s| !s.is_deleted())
            .cloned())
    }

    async fn list_data_sources(
        &self,
        workspace_id: Uuid,
        health: Option<Health>,
    ) -> Result<Vec<DataSource>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let mut sources: Vec<DataSource> = tables
            .data_sources
            .values()
            .filter(|s| !s.is_deleted() && s.workspace_id == workspace_id)
            .filter(|s| health.map_or(true, |h| s.health == h))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(sources)
    }

    async fn set_data_source_health(&self, id: Uuid, health: Health) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        match tables.data_sources.get_mut(&id) {
            Some(source) if !source.is_deleted() => {
                source.health = health;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete_data_source(&self, id: Uuid, deleted_at: DateTime<Utc>) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        match tables.data_sources.get_mut(&id) {
            Some(source) if !source.is_deleted() => {
                source.deleted_at = Some(deleted_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl MetricsGroupRepository for MemoryStore {
    async fn insert_metrics_group(&self, group: &MetricsGroup) -> Result<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        if tables.groups.iter().any(|g| g.id == group.id) {
            return Err(CompassError::Persistence(format!(
                "duplicate metrics group id {}",
                group.id
            )));
        }
        for (index, metric) in group.metrics.iter().enumerate() {
            let repeated = group.metrics[..index].iter().any(|m| m.id == metric.id);
            if repeated || tables.metrics.iter().any(|m| m.id == metric.id) {
                return Err(CompassError::Persistence(format!(
                    "duplicate metric id {}",
                    metric.id
                )));
            }
        }

        let mut row = group.clone();
        row.metrics = Vec::new();
        tables.groups.push(row);

        for metric in &group.metrics {
            tables.metrics.push(metric.clone());
            tables.executions.push(metric.execution.clone());
        }
        Ok(())
    }

    async fn list_metrics_groups(&self) -> Result<Vec<MetricsGroup>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables.groups.iter().map(|g| tables.hydrate_group(g)).collect())
    }

    async fn find_metrics_group(&self, id: Uuid) -> Result<Option<MetricsGroup>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .iter()
            .find(|g| g.id == id)
            .map(|g| tables.hydrate_group(g)))
    }

    async fn update_metrics_group(&self, id: Uuid, update: &MetricsGroupUpdate) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        match tables.groups.iter_mut().find(|g| g.id == id) {
            Some(group) => {
                group.name = update.name.clone();
                group.circle_id = update.circle_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_metrics_group(&self, id: Uuid) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let before = tables.groups.len();
        tables.groups.retain(|g| g.id != id);
        if tables.groups.len() == before {
            return Ok(false);
        }
        tables.remove_metrics(|m| m.metrics_group_id != id);
        Ok(true)
    }

    async fn insert_metric(&self, metric: &Metric) -> Result<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        if !tables.groups.iter().any(|g| g.id == metric.metrics_group_id) {
            return Err(CompassError::not_found(
                "Metrics group",
                metric.metrics_group_id,
            ));
        }
        if tables.metrics.iter().any(|m| m.id == metric.id) {
            return Err(CompassError::Persistence(format!(
                "duplicate metric id {}",
                metric.id
            )));
        }
        tables.metrics.push(metric.clone());
        tables.executions.push(metric.execution.clone());
        Ok(())
    }

    async fn find_metric(&self, id: Uuid) -> Result<Option<Metric>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables
            .metrics
            .iter()
            .find(|m| m.id == id)
            .map(|m| tables.hydrate(m)))
    }

    async fn update_metric(&self, metric: &Metric) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        match tables.metrics.iter_mut().find(|m| m.id == metric.id) {
            Some(row) => {
                row.data_source_id = metric.data_source_id;
                row.nickname = metric.nickname.clone();
                row.query = metric.query.clone();
                row.metric = metric.metric.clone();
                row.filters = metric.filters.clone();
                row.group_by = metric.group_by.clone();
                row.condition = metric.condition;
                row.threshold = metric.threshold;
                row.circle_id = metric.circle_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_metric(&self, id: Uuid) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let before = tables.metrics.len();
        tables.remove_metrics(|m| m.id != id);
        Ok(tables.metrics.len() != before)
    }
}

#[async_trait]
impl MetricExecutionRepository for MemoryStore {
    async fn list_metric_executions(&self) -> Result<Vec<MetricExecution>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables.executions.clone())
    }

    async fn find_metric_execution(&self, metric_id: Uuid) -> Result<Option<MetricExecution>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables.execution_for(metric_id).cloned())
    }

    async fn update_metric_execution(&self, execution: &MetricExecution) -> Result<bool> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        match tables.executions.iter_mut().find(|e| e.id == execution.id) {
            Some(row) => {
                row.last_value = execution.last_value;
                row.status = execution.status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
