//! Metrics group and metric management
//!
//! Writes are all-or-nothing: a group or metric is validated completely and
//! nothing is stored when any violation is found.

use compass_core::{
    CompassError, Metric, MetricExecution, MetricsGroup, MetricsGroupUpdate, Result,
};
use compass_storage::Store;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const GROUP: &str = "Metrics group";
const METRIC: &str = "Metric";

#[derive(Clone)]
pub struct MetricsGroupService {
    store: Arc<dyn Store>,
}

impl MetricsGroupService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Decode a JSON document into an unsaved group
    pub fn parse(&self, document: &[u8]) -> Result<MetricsGroup> {
        MetricsGroup::parse(document)
    }

    /// Validate and store a group; each metric gets a fresh id and ACTIVE execution
    #[instrument(skip(self, group), fields(name = %group.name, metrics = group.metrics.len()))]
    pub async fn create(&self, mut group: MetricsGroup) -> Result<MetricsGroup> {
        group.validate().into_result()?;
        for metric in &mut group.metrics {
            metric.id = Uuid::new_v4();
        }
        group.adopt_metrics();

        self.store.insert_metrics_group(&group).await?;
        info!("Created metrics group {}", group.id);
        Ok(group)
    }

    pub async fn find_all(&self) -> Result<Vec<MetricsGroup>> {
        self.store.list_metrics_groups().await
    }

    /// Group with its metrics and their executions
    pub async fn find_by_id(&self, id: Uuid) -> Result<MetricsGroup> {
        self.store
            .find_metrics_group(id)
            .await?
            .ok_or_else(|| CompassError::not_found(GROUP, id))
    }

    /// Rename a group or move it to another circle
    pub async fn update(&self, id: Uuid, update: MetricsGroupUpdate) -> Result<MetricsGroup> {
        update.validate().into_result()?;
        if !self.store.update_metrics_group(id, &update).await? {
            return Err(CompassError::not_found(GROUP, id));
        }
        self.find_by_id(id).await
    }

    /// Delete a group together with its metrics and executions
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_metrics_group(id).await? {
            return Err(CompassError::not_found(GROUP, id));
        }
        info!("Deleted metrics group {}", id);
        Ok(())
    }

    pub async fn add_metric(&self, group_id: Uuid, mut metric: Metric) -> Result<Metric> {
        metric.validate().into_result()?;
        let group = self.find_by_id(group_id).await?;

        metric.metrics_group_id = group.id;
        if metric.circle_id.is_nil() {
            metric.circle_id = group.circle_id;
        }
        metric.execution = MetricExecution::new(metric.id);

        self.store.insert_metric(&metric).await?;
        Ok(metric)
    }

    /// Update a metric's definition; its execution state is kept
    pub async fn update_metric(&self, metric: Metric) -> Result<Metric> {
        metric.validate().into_result()?;
        if !self.store.update_metric(&metric).await? {
            return Err(CompassError::not_found(METRIC, metric.id));
        }
        self.store
            .find_metric(metric.id)
            .await?
            .ok_or_else(|| CompassError::not_found(METRIC, metric.id))
    }

    pub async fn remove_metric(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_metric(id).await? {
            return Err(CompassError::not_found(METRIC, id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::{Condition, ExecutionStatus};
    use compass_storage::MemoryStore;

    fn service() -> MetricsGroupService {
        MetricsGroupService::new(Arc::new(MemoryStore::new()))
    }

    fn metric(name: &str) -> Metric {
        Metric::new(Uuid::new_v4(), format!("{} nickname", name), name, Condition::Equal, 1.0)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let service = service();
        let circle = Uuid::new_v4();
        let group = MetricsGroup::new("canary", Uuid::new_v4(), circle)
            .with_metric(metric("errors"))
            .with_metric(metric("latency"));

        let created = service.create(group).await.unwrap();
        let found = service.find_by_id(created.id).await.unwrap();

        assert_eq!(found.metrics.len(), 2);
        for m in &found.metrics {
            assert_eq!(m.metrics_group_id, created.id);
            assert_eq!(m.circle_id, circle);
            assert_eq!(m.execution.metric_id, m.id);
            assert_eq!(m.execution.status, ExecutionStatus::Active);
        }
        assert_eq!(service.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_group() {
        let service = service();
        let group = MetricsGroup::new("", Uuid::new_v4(), Uuid::nil());

        let err = service.create(group).await.unwrap_err();
        match err {
            CompassError::Validation(errors) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.has_field("name"));
                assert!(errors.has_field("metrics"));
                assert!(errors.has_field("circleId"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(service.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_then_create() {
        let service = service();
        let document = format!(
            r#"{{
                "name": "group 1",
                "workspaceId": "{}",
                "circleId": "{}",
                "metrics": [{{
                    "nickname": "errors",
                    "dataSourceId": "{}",
                    "metric": "MetricName",
                    "condition": "GREATER_THAN",
                    "threshold": 5
                }}]
            }}"#,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4()
        );

        let group = service.parse(document.as_bytes()).unwrap();
        let created = service.create(group).await.unwrap();
        assert_eq!(created.metrics[0].condition, Some(Condition::GreaterThan));
        assert_eq!(created.metrics[0].threshold, 5.0);
    }

    #[tokio::test]
    async fn test_create_ignores_document_metric_ids() {
        let service = service();
        let first = service
            .create(
                MetricsGroup::new("first", Uuid::new_v4(), Uuid::new_v4())
                    .with_metric(metric("errors")),
            )
            .await
            .unwrap();
        let taken = first.metrics[0].id;

        let mut reused = metric("latency");
        reused.id = taken;
        let second = service
            .create(MetricsGroup::new("second", Uuid::new_v4(), Uuid::new_v4()).with_metric(reused))
            .await
            .unwrap();

        let id = second.metrics[0].id;
        assert_ne!(id, taken);
        assert_eq!(second.metrics[0].execution.metric_id, id);

        let first = service.find_by_id(first.id).await.unwrap();
        assert_eq!(first.metrics[0].id, taken);
        assert_eq!(first.metrics[0].metric, "errors");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let service = service();
        let group = MetricsGroup::new("canary", Uuid::new_v4(), Uuid::new_v4())
            .with_metric(metric("errors"));
        let created = service.create(group).await.unwrap();

        let circle = Uuid::new_v4();
        let updated = service
            .update(
                created.id,
                MetricsGroupUpdate {
                    name: "stable".to_string(),
                    circle_id: circle,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "stable");
        assert_eq!(updated.circle_id, circle);
        assert_eq!(updated.metrics.len(), 1);

        let bad = service
            .update(
                created.id,
                MetricsGroupUpdate {
                    name: String::new(),
                    circle_id: circle,
                },
            )
            .await;
        assert!(matches!(bad, Err(CompassError::Validation(_))));

        service.delete(created.id).await.unwrap();
        assert!(service.find_by_id(created.id).await.unwrap_err().is_not_found());
        assert!(service.delete(created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_metric_operations() {
        let service = service();
        let group = MetricsGroup::new("canary", Uuid::new_v4(), Uuid::new_v4())
            .with_metric(metric("errors"));
        let created = service.create(group).await.unwrap();

        let added = service.add_metric(created.id, metric("latency")).await.unwrap();
        assert_eq!(added.metrics_group_id, created.id);
        assert_eq!(added.circle_id, created.circle_id);

        let mut changed = added.clone();
        changed.threshold = 250.0;
        changed.condition = Some(Condition::LessThan);
        let saved = service.update_metric(changed).await.unwrap();
        assert_eq!(saved.threshold, 250.0);
        assert_eq!(saved.execution.id, added.execution.id);

        service.remove_metric(added.id).await.unwrap();
        assert_eq!(service.find_by_id(created.id).await.unwrap().metrics.len(), 1);
        assert!(service.remove_metric(added.id).await.unwrap_err().is_not_found());

        let orphan = service.add_metric(Uuid::new_v4(), metric("x")).await;
        assert!(orphan.unwrap_err().is_not_found());
    }
}
