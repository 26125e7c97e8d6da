//! Query orchestration
//!
//! Evaluating a group runs in two phases. The query phase resolves every
//! metric's data source and driver and queries the backend, concurrently and
//! bounded by a semaphore. The tracking phase then hands each numeric result
//! to the [`ExecutionTracker`]. Executions are never written before the query
//! phase is over, so a failed, cancelled or timed-out evaluation leaves them
//! untouched.

use compass_core::{
    config::{EvaluationConfig, FailurePolicy},
    CompassError, Metric, MetricExecution, MetricsGroup, Result,
};
use compass_drivers::{DriverRegistry, QueryResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::datasource::DataSourceService;
use crate::metrics_group::MetricsGroupService;
use crate::tracker::ExecutionTracker;

/// Outcome of one group evaluation
#[derive(Debug, Clone, Default)]
pub struct GroupEvaluation {
    pub group_id: Uuid,
    /// Results keyed by metric name
    pub results: HashMap<String, QueryResult>,
    /// Failed metrics and their error; only filled in best-effort mode
    pub failures: HashMap<String, String>,
    /// Executions written by the tracking phase
    pub executions: Vec<MetricExecution>,
}

impl GroupEvaluation {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything a spawned metric query needs
#[derive(Clone)]
struct MetricQuery {
    data_sources: DataSourceService,
    registry: Arc<DriverRegistry>,
    timeout: Duration,
}

impl MetricQuery {
    async fn run(&self, metric: &Metric) -> Result<QueryResult> {
        let source = self.data_sources.find_by_id(metric.data_source_id).await?;
        let driver = self.registry.resolve(&source.plugin_src).await?;
        let decrypted = self.data_sources.decrypt(source)?;

        let connection = decrypted.connection_bytes()?;
        let spec = metric.query_spec().to_bytes()?;

        match tokio::time::timeout(self.timeout, driver.query(&connection, &spec)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(CompassError::query(metric.result_key(), err.to_string())),
            Err(_) => Err(CompassError::query(
                metric.result_key(),
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }
}

type Outcome = (usize, Metric, Result<QueryResult>);

pub struct QueryOrchestrator {
    groups: MetricsGroupService,
    query: MetricQuery,
    tracker: Arc<ExecutionTracker>,
    config: EvaluationConfig,
}

impl QueryOrchestrator {
    pub fn new(
        groups: MetricsGroupService,
        data_sources: DataSourceService,
        registry: Arc<DriverRegistry>,
        tracker: Arc<ExecutionTracker>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            groups,
            query: MetricQuery {
                data_sources,
                registry,
                timeout: config.metric_timeout(),
            },
            tracker,
            config,
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate a group with the configured deadline
    pub async fn evaluate(&self, group_id: Uuid) -> Result<GroupEvaluation> {
        self.evaluate_with(group_id, CancellationToken::new(), self.config.group_deadline())
            .await
    }

    /// Evaluate a group under an explicit cancellation token and deadline
    #[instrument(skip(self, cancel))]
    pub async fn evaluate_with(
        &self,
        group_id: Uuid,
        cancel: CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<GroupEvaluation> {
        let group = self.groups.find_by_id(group_id).await?;
        debug!("Evaluating {} metrics of group {}", group.metrics.len(), group.id);

        let outcomes = match deadline {
            Some(limit) => tokio::time::timeout(limit, self.query_all(&group, &cancel))
                .await
                .map_err(|_| CompassError::DeadlineExceeded(limit))??,
            None => self.query_all(&group, &cancel).await?,
        };

        let mut evaluation = GroupEvaluation {
            group_id: group.id,
            ..Default::default()
        };

        for (_, metric, outcome) in outcomes {
            let key = metric.result_key().to_string();
            match outcome {
                Ok(result) => {
                    match result.scalar() {
                        Some(value) => {
                            let execution = self.tracker.record(&metric, value).await?;
                            evaluation.executions.push(execution);
                        }
                        None => warn!("Result for metric {} has no numeric reading", key),
                    }
                    evaluation.results.insert(key, result);
                }
                Err(err) => {
                    warn!("Metric {} failed: {}", key, err);
                    evaluation.failures.insert(key, err.to_string());
                }
            }
        }

        info!(
            "Evaluated group {}: {} results, {} failures",
            group.id,
            evaluation.results.len(),
            evaluation.failures.len()
        );
        Ok(evaluation)
    }

    /// Query phase; outcomes come back in the group's metric order
    async fn query_all(
        &self,
        group: &MetricsGroup,
        cancel: &CancellationToken,
    ) -> Result<Vec<Outcome>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, metric) in group.metrics.iter().cloned().enumerate() {
            let query = self.query.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => query.run(&metric).await,
                    Err(_) => Err(CompassError::Cancelled),
                };
                (index, metric, outcome)
            });
        }

        let fail_fast = self.config.failure_policy == FailurePolicy::FailFast;
        let mut outcomes = Vec::with_capacity(group.metrics.len());
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!("Evaluation of group {} cancelled", group.id);
                    return Err(CompassError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };

            let Some(joined) = joined else { break };
            let (index, metric, outcome) = joined
                .map_err(|e| CompassError::query("evaluation task", e.to_string()))?;

            let outcome = match outcome {
                Err(err) if fail_fast => {
                    tasks.abort_all();
                    debug!("Metric {} failed, abandoning group {}", metric.result_key(), group.id);
                    return Err(err);
                }
                other => other,
            };
            outcomes.push((index, metric, outcome));
        }

        outcomes.sort_by_key(|(index, _, _)| *index);
        Ok(outcomes)
    }
}
