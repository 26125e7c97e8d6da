//! # compass-engine
//!
//! Metric evaluation services for Compass.
//!
//! This crate provides:
//! - Data source management with sealed credentials
//! - Metrics group and metric management with aggregate validation
//! - The query orchestrator evaluating a group against its backends
//! - The execution tracker moving each metric from ACTIVE to REACHED
//! - A scheduler evaluating every group on an interval

mod datasource;
mod metrics_group;
mod orchestrator;
mod scheduler;
mod tracker;

pub use datasource::DataSourceService;
pub use metrics_group::MetricsGroupService;
pub use orchestrator::{GroupEvaluation, QueryOrchestrator};
pub use scheduler::{Scheduler, TickSummary};
pub use tracker::{is_reached, transition, ExecutionTracker};

use compass_core::config::EvaluationConfig;
use compass_drivers::DriverRegistry;
use compass_storage::{CredentialCipher, Store};
use std::sync::Arc;

/// All services wired over one store
#[derive(Clone)]
pub struct Engine {
    pub data_sources: DataSourceService,
    pub groups: MetricsGroupService,
    pub tracker: Arc<ExecutionTracker>,
    pub orchestrator: Arc<QueryOrchestrator>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: CredentialCipher,
        registry: Arc<DriverRegistry>,
        config: EvaluationConfig,
    ) -> Self {
        let data_sources = DataSourceService::new(Arc::clone(&store), cipher);
        let groups = MetricsGroupService::new(Arc::clone(&store));
        let tracker = Arc::new(ExecutionTracker::new(store, config.transition_policy));
        let orchestrator = Arc::new(QueryOrchestrator::new(
            groups.clone(),
            data_sources.clone(),
            registry,
            Arc::clone(&tracker),
            config,
        ));

        Self {
            data_sources,
            groups,
            tracker,
            orchestrator,
        }
    }

    /// Scheduler ticking on the configured evaluation interval
    pub fn scheduler(&self) -> Scheduler {
        let interval = self.orchestrator.config().interval();
        Scheduler::new(self.groups.clone(), Arc::clone(&self.orchestrator), interval)
    }
}
