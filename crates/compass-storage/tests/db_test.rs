//! Integration tests for the Turso storage backend
//!
//! Tests the full database functionality including:
//! - Schema initialization
//! - Data-source soft delete and health filtering
//! - Metrics group round trip with metric executions
//! - Cascading deletes
//! - Closed connections

use chrono::Utc;
use compass_core::{
    CompassError, Condition, DataSource, ExecutionStatus, Health, Metric, MetricFilter,
    MetricsGroup, MetricsGroupUpdate,
};
use compass_storage::{
    DataSourceRepository, MetricExecutionRepository, MetricsGroupRepository, TursoStore,
};
use std::collections::HashSet;
use tempfile::TempDir;
use uuid::Uuid;

/// Helper to create a temporary database for testing
async fn create_test_db() -> (TursoStore, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("compass").join("test.db");

    let store = TursoStore::open(&db_path)
        .await
        .expect("Failed to open database");

    (store, temp_dir)
}

fn create_source(workspace_id: Uuid, name: &str, health: Health) -> DataSource {
    DataSource {
        id: Uuid::new_v4(),
        name: name.to_string(),
        workspace_id,
        plugin_src: "prometheus".to_string(),
        sealed_data: "c2VhbGVk".to_string(),
        health,
        created_at: Utc::now(),
        deleted_at: None,
    }
}

fn create_group(source_id: Uuid, metric_count: usize) -> MetricsGroup {
    let mut group = MetricsGroup::new("group 1", Uuid::new_v4(), Uuid::new_v4());
    for i in 0..metric_count {
        group.metrics.push(
            Metric::new(
                source_id,
                format!("nickname {}", i),
                format!("MetricName{}", i),
                Condition::GreaterThan,
                0.5 + i as f64,
            )
            .with_filter(MetricFilter::new("app", "web"))
            .with_group_by("instance"),
        );
    }
    group.adopt_metrics();
    group
}

#[tokio::test]
async fn test_database_initialization() {
    let (store, _dir) = create_test_db().await;

    // Schema creation is idempotent
    store.init_schema().await.unwrap();

    assert!(store.list_metrics_groups().await.unwrap().is_empty());
    assert!(store.list_metric_executions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_data_source_soft_delete() {
    let (store, _dir) = create_test_db().await;
    let workspace = Uuid::new_v4();
    let source = create_source(workspace, "prom", Health::Healthy);
    store.insert_data_source(&source).await.unwrap();

    let found = store.find_data_source(source.id).await.unwrap().unwrap();
    assert_eq!(found, source);

    assert!(store
        .soft_delete_data_source(source.id, Utc::now())
        .await
        .unwrap());

    assert!(store.find_data_source(source.id).await.unwrap().is_none());
    assert!(store
        .list_data_sources(workspace, None)
        .await
        .unwrap()
        .is_empty());
    assert!(!store
        .soft_delete_data_source(source.id, Utc::now())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_list_data_sources_by_health() {
    let (store, _dir) = create_test_db().await;
    let workspace = Uuid::new_v4();
    let healthy = create_source(workspace, "a", Health::Healthy);
    let unknown = create_source(workspace, "b", Health::Unknown);
    let other = create_source(Uuid::new_v4(), "c", Health::Healthy);
    for source in [&healthy, &unknown, &other] {
        store.insert_data_source(source).await.unwrap();
    }

    assert_eq!(store.list_data_sources(workspace, None).await.unwrap().len(), 2);

    let filtered = store
        .list_data_sources(workspace, Some(Health::Healthy))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, healthy.id);

    assert!(store
        .set_data_source_health(unknown.id, Health::Healthy)
        .await
        .unwrap());
    assert_eq!(
        store
            .list_data_sources(workspace, Some(Health::Healthy))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_metrics_group_round_trip() {
    let (store, _dir) = create_test_db().await;
    let group = create_group(Uuid::new_v4(), 2);
    store.insert_metrics_group(&group).await.unwrap();

    let loaded = store.find_metrics_group(group.id).await.unwrap().unwrap();
    assert_eq!(loaded, group);
    assert_eq!(loaded.metrics[0].filters[0].field, "app");
    assert_eq!(loaded.metrics[1].threshold, 1.5);

    let all = store.list_metrics_groups().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].metrics.len(), 2);
}

#[tokio::test]
async fn test_executions_start_active_and_zero() {
    let (store, _dir) = create_test_db().await;
    let group = create_group(Uuid::new_v4(), 3);
    store.insert_metrics_group(&group).await.unwrap();

    let executions = store.list_metric_executions().await.unwrap();
    assert_eq!(executions.len(), 3);

    let metric_ids: HashSet<Uuid> = executions.iter().map(|e| e.metric_id).collect();
    let expected: HashSet<Uuid> = group.metrics.iter().map(|m| m.id).collect();
    assert_eq!(metric_ids, expected);

    for execution in &executions {
        assert_eq!(execution.status, ExecutionStatus::Active);
        assert_eq!(execution.last_value, 0.0);
    }
}

#[tokio::test]
async fn test_update_execution() {
    let (store, _dir) = create_test_db().await;
    let group = create_group(Uuid::new_v4(), 1);
    store.insert_metrics_group(&group).await.unwrap();

    let mut execution = group.metrics[0].execution.clone();
    execution.last_value = 5.25;
    execution.status = ExecutionStatus::Reached;
    assert!(store.update_metric_execution(&execution).await.unwrap());

    let loaded = store
        .find_metric_execution(group.metrics[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.last_value, 5.25);
    assert_eq!(loaded.status, ExecutionStatus::Reached);

    let mut unknown = execution.clone();
    unknown.id = Uuid::new_v4();
    assert!(!store.update_metric_execution(&unknown).await.unwrap());
}

#[tokio::test]
async fn test_group_update_and_metric_crud() {
    let (store, _dir) = create_test_db().await;
    let group = create_group(Uuid::new_v4(), 1);
    store.insert_metrics_group(&group).await.unwrap();

    let update = MetricsGroupUpdate {
        name: "renamed".to_string(),
        circle_id: Uuid::new_v4(),
    };
    assert!(store.update_metrics_group(group.id, &update).await.unwrap());

    let mut extra = Metric::new(group.metrics[0].data_source_id, "extra", "Extra", Condition::LessThan, 3.0);
    extra.metrics_group_id = group.id;
    extra.circle_id = update.circle_id;
    extra.execution.metric_id = extra.id;
    store.insert_metric(&extra).await.unwrap();

    let loaded = store.find_metrics_group(group.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "renamed");
    assert_eq!(loaded.circle_id, update.circle_id);
    assert_eq!(loaded.metrics.len(), 2);

    let mut changed = extra.clone();
    changed.threshold = 7.0;
    changed.condition = Some(Condition::Equal);
    assert!(store.update_metric(&changed).await.unwrap());
    let reloaded = store.find_metric(extra.id).await.unwrap().unwrap();
    assert_eq!(reloaded.threshold, 7.0);
    assert_eq!(reloaded.condition, Some(Condition::Equal));

    assert!(store.delete_metric(extra.id).await.unwrap());
    assert!(store.find_metric(extra.id).await.unwrap().is_none());
    assert!(store.find_metric_execution(extra.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_insert_metric_into_missing_group() {
    let (store, _dir) = create_test_db().await;
    let mut metric = Metric::new(Uuid::new_v4(), "n", "m", Condition::Equal, 1.0);
    metric.metrics_group_id = Uuid::new_v4();

    let err = store.insert_metric(&metric).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_group_cascades() {
    let (store, _dir) = create_test_db().await;
    let group = create_group(Uuid::new_v4(), 2);
    let other = create_group(Uuid::new_v4(), 1);
    store.insert_metrics_group(&group).await.unwrap();
    store.insert_metrics_group(&other).await.unwrap();

    assert!(store.delete_metrics_group(group.id).await.unwrap());
    assert!(store.find_metrics_group(group.id).await.unwrap().is_none());

    let executions = store.list_metric_executions().await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].metric_id, other.metrics[0].id);

    assert!(!store.delete_metrics_group(group.id).await.unwrap());
}

#[tokio::test]
async fn test_closed_connection_is_persistence_error() {
    let (store, _dir) = create_test_db().await;
    store.close().await;

    let err = store.list_metric_executions().await.unwrap_err();
    assert!(matches!(err, CompassError::Persistence(_)));

    let err = store.find_metrics_group(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CompassError::Persistence(_)));
}
