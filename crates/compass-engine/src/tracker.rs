//! Execution state tracking
//!
//! Every metric owns one execution that starts ACTIVE with a zero value. Each
//! numeric reading is persisted as the execution's last value; the status
//! moves according to [`transition`].

use compass_core::{
    config::TransitionPolicy, CompassError, ExecutionStatus, Metric, MetricExecution, Result,
};
use compass_storage::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Next status of an execution once a reading has been compared
pub fn transition(
    status: ExecutionStatus,
    condition_met: bool,
    policy: TransitionPolicy,
) -> ExecutionStatus {
    match (status, condition_met, policy) {
        (_, true, _) => ExecutionStatus::Reached,
        (ExecutionStatus::Reached, false, TransitionPolicy::Latching) => ExecutionStatus::Reached,
        (ExecutionStatus::Reached, false, TransitionPolicy::Tracking) => ExecutionStatus::Active,
        (ExecutionStatus::Active, false, _) => ExecutionStatus::Active,
    }
}

/// Answered from the stored status; nothing is re-evaluated
pub fn is_reached(execution: &MetricExecution) -> bool {
    execution.is_reached()
}

pub struct ExecutionTracker {
    store: Arc<dyn Store>,
    policy: TransitionPolicy,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn Store>, policy: TransitionPolicy) -> Self {
        Self {
            store,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// All executions in creation order
    pub async fn find_all(&self) -> Result<Vec<MetricExecution>> {
        self.store.list_metric_executions().await
    }

    pub async fn find_by_metric(&self, metric_id: Uuid) -> Result<MetricExecution> {
        self.store
            .find_metric_execution(metric_id)
            .await?
            .ok_or_else(|| CompassError::not_found("Metric execution", metric_id))
    }

    /// Persist an execution's value and status as given
    pub async fn update(&self, execution: MetricExecution) -> Result<MetricExecution> {
        let metric_id = execution.metric_id;
        let lock = self.lock_for(metric_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.write(execution).await
        };
        self.release(metric_id, lock).await;
        result
    }

    /// Record a reading for `metric` and move its status
    #[instrument(skip(self, metric), fields(metric = %metric.result_key()))]
    pub async fn record(&self, metric: &Metric, value: f64) -> Result<MetricExecution> {
        let lock = self.lock_for(metric.id).await;
        let result = {
            let _guard = lock.lock().await;
            self.record_locked(metric, value).await
        };
        self.release(metric.id, lock).await;
        result
    }

    /// Caller holds the metric's lock
    async fn record_locked(&self, metric: &Metric, value: f64) -> Result<MetricExecution> {
        let mut execution = self.find_by_metric(metric.id).await?;
        let previous = execution.status;

        execution.last_value = value;
        execution.status = transition(previous, metric.is_met(value), self.policy);

        let execution = self.write(execution).await?;
        if execution.status != previous {
            info!(
                "Metric {} moved {} -> {} at value {}",
                metric.id, previous, execution.status, value
            );
        } else {
            debug!("Metric {} stays {} at value {}", metric.id, previous, value);
        }
        Ok(execution)
    }

    async fn write(&self, execution: MetricExecution) -> Result<MetricExecution> {
        if !self.store.update_metric_execution(&execution).await? {
            return Err(CompassError::not_found("Metric execution", execution.id));
        }
        Ok(execution)
    }

    async fn lock_for(&self, metric_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(metric_id).or_default())
    }

    /// Drop the map entry once no other task holds a handle to it
    async fn release(&self, metric_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(&metric_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&metric_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::{Condition, MetricsGroup};
    use compass_storage::{MemoryStore, MetricsGroupRepository};

    async fn setup(
        condition: Condition,
        threshold: f64,
        policy: TransitionPolicy,
    ) -> (Arc<MemoryStore>, ExecutionTracker, Metric) {
        let store = Arc::new(MemoryStore::new());
        let mut group = MetricsGroup::new("g", Uuid::new_v4(), Uuid::new_v4()).with_metric(
            Metric::new(Uuid::new_v4(), "n", "m", condition, threshold),
        );
        group.adopt_metrics();
        store.insert_metrics_group(&group).await.unwrap();

        let tracker = ExecutionTracker::new(store.clone(), policy);
        (store, tracker, group.metrics[0].clone())
    }

    #[test]
    fn test_transition_latching() {
        use ExecutionStatus::*;
        let policy = TransitionPolicy::Latching;
        assert_eq!(transition(Active, true, policy), Reached);
        assert_eq!(transition(Active, false, policy), Active);
        assert_eq!(transition(Reached, true, policy), Reached);
        assert_eq!(transition(Reached, false, policy), Reached);
    }

    #[test]
    fn test_transition_tracking() {
        use ExecutionStatus::*;
        let policy = TransitionPolicy::Tracking;
        assert_eq!(transition(Active, true, policy), Reached);
        assert_eq!(transition(Reached, false, policy), Active);
    }

    #[tokio::test]
    async fn test_equal_reaches() {
        let (_, tracker, metric) = setup(Condition::Equal, 5.0, TransitionPolicy::Latching).await;

        let execution = tracker.record(&metric, 5.0).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Reached);
        assert_eq!(execution.last_value, 5.0);
        assert!(is_reached(&execution));
        assert!(is_reached(&tracker.find_by_metric(metric.id).await.unwrap()));
    }

    #[tokio::test]
    async fn test_unmet_keeps_status_but_stores_value() {
        let (_, tracker, metric) =
            setup(Condition::GreaterThan, 1.0, TransitionPolicy::Latching).await;

        let execution = tracker.record(&metric, 0.5).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Active);
        assert_eq!(execution.last_value, 0.5);
    }

    #[tokio::test]
    async fn test_reached_never_reverts() {
        let (_, tracker, metric) = setup(Condition::LessThan, 10.0, TransitionPolicy::Latching).await;

        tracker.record(&metric, 3.0).await.unwrap();
        let execution = tracker.record(&metric, 30.0).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Reached);
        assert_eq!(execution.last_value, 30.0);
    }

    #[tokio::test]
    async fn test_tracking_policy_falls_back() {
        let (_, tracker, metric) = setup(Condition::LessThan, 10.0, TransitionPolicy::Tracking).await;

        tracker.record(&metric, 3.0).await.unwrap();
        let execution = tracker.record(&metric, 30.0).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Active);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_serialized() {
        let (_, tracker, metric) = setup(Condition::Equal, 7.0, TransitionPolicy::Latching).await;
        let tracker = Arc::new(tracker);

        let mut handles = Vec::new();
        for i in 0..16 {
            let tracker = Arc::clone(&tracker);
            let metric = metric.clone();
            handles.push(tokio::spawn(async move {
                tracker.record(&metric, i as f64).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 7.0 was recorded at some point; latching keeps it REACHED
        let execution = tracker.find_by_metric(metric.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Reached);
    }

    #[tokio::test]
    async fn test_update_and_record_are_serialized() {
        for _ in 0..20 {
            let (_, tracker, metric) =
                setup(Condition::Equal, 7.0, TransitionPolicy::Latching).await;
            let tracker = Arc::new(tracker);

            let mut reached = metric.execution.clone();
            reached.status = ExecutionStatus::Reached;
            reached.last_value = 7.0;

            let updater = {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.update(reached).await })
            };
            let recorder = {
                let tracker = Arc::clone(&tracker);
                let metric = metric.clone();
                tokio::spawn(async move { tracker.record(&metric, 1.0).await })
            };
            updater.await.unwrap().unwrap();
            recorder.await.unwrap().unwrap();

            // Whichever write lands second sees or keeps REACHED
            let execution = tracker.find_by_metric(metric.id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Reached);
        }
    }

    #[tokio::test]
    async fn test_locks_released_after_writes() {
        let (_, tracker, metric) = setup(Condition::Equal, 1.0, TransitionPolicy::Latching).await;

        tracker.record(&metric, 1.0).await.unwrap();
        tracker.update(metric.execution.clone()).await.unwrap();
        assert!(tracker.record(&metric_with_unknown_id(&metric), 1.0).await.is_err());

        assert!(tracker.locks.lock().await.is_empty());
    }

    fn metric_with_unknown_id(metric: &Metric) -> Metric {
        let mut unknown = metric.clone();
        unknown.id = Uuid::new_v4();
        unknown
    }

    #[tokio::test]
    async fn test_update_unknown_execution() {
        let (_, tracker, _) = setup(Condition::Equal, 1.0, TransitionPolicy::Latching).await;
        let err = tracker
            .update(MetricExecution::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_closed_store() {
        let (store, tracker, metric) =
            setup(Condition::Equal, 1.0, TransitionPolicy::Latching).await;
        store.close();

        assert!(matches!(
            tracker.find_all().await,
            Err(CompassError::Persistence(_))
        ));
        assert!(matches!(
            tracker.update(metric.execution.clone()).await,
            Err(CompassError::Persistence(_))
        ));
        assert!(matches!(
            tracker.record(&metric, 1.0).await,
            Err(CompassError::Persistence(_))
        ));
    }
}
