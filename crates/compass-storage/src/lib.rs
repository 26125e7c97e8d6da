//! Compass Storage - persistence layer for the metric-evaluation engine
//!
//! # Overview
//!
//! Two backends implement the same repository traits:
//! - [`TursoStore`]: a local Turso database in WAL mode
//! - [`MemoryStore`]: an in-process store for tests and embedding
//!
//! Data-source connection configurations never reach a backend in clear
//! text: [`CredentialCipher`] seals them first.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         Compass Engine                      │
//! │  (services, orchestrator, tracker)          │
//! └─────────────────┬───────────────────────────┘
//!                   │ Arc<dyn Store>
//! ┌─────────────────▼───────────────────────────┐
//! │         Compass Storage (this crate)        │
//! │  • Repository traits                        │
//! │  • TursoStore / MemoryStore                 │
//! │  • Credential sealing                       │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         Turso Database                      │
//! │  • .compass/compass.db                      │
//! │  • Tables: data_sources, metrics_groups,    │
//! │    metrics, metric_executions               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use compass_storage::{MetricExecutionRepository, TursoStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TursoStore::open(".compass/compass.db").await?;
//! for execution in store.list_metric_executions().await? {
//!     println!("{} {}", execution.metric_id, execution.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod db;
pub mod memory;
pub mod repository;

pub use cipher::CredentialCipher;
pub use db::{DbError, TursoStore};
pub use memory::MemoryStore;
pub use repository::{
    DataSourceRepository, MetricExecutionRepository, MetricsGroupRepository, Store,
};
