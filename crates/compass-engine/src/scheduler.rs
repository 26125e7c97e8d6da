//! Periodic evaluation of every metrics group

use compass_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics_group::MetricsGroupService;
use crate::orchestrator::QueryOrchestrator;

/// Counts for one pass over all groups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub failed: usize,
}

pub struct Scheduler {
    groups: MetricsGroupService,
    orchestrator: Arc<QueryOrchestrator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        groups: MetricsGroupService,
        orchestrator: Arc<QueryOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            groups,
            orchestrator,
            interval,
        }
    }

    /// Evaluate every group once; a failing group does not stop the pass
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickSummary> {
        let groups = self.groups.find_all().await?;
        let deadline = self.orchestrator.config().group_deadline();
        let mut summary = TickSummary::default();

        for group in groups {
            if cancel.is_cancelled() {
                break;
            }

            match self
                .orchestrator
                .evaluate_with(group.id, cancel.child_token(), deadline)
                .await
            {
                Ok(evaluation) if evaluation.is_complete() => summary.evaluated += 1,
                Ok(evaluation) => {
                    warn!(
                        "Group {} evaluated with {} failed metrics",
                        group.id,
                        evaluation.failures.len()
                    );
                    summary.evaluated += 1;
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!("Failed to evaluate group {}: {}", group.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Tick on the configured interval until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Evaluation scheduler started"
        );

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Evaluation scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(&cancel).await {
                        Ok(summary) => debug!(
                            evaluated = summary.evaluated,
                            failed = summary.failed,
                            "Evaluation pass complete"
                        ),
                        Err(e) => error!("Evaluation pass failed: {}", e),
                    }
                }
            }
        }
    }
}
