//! Turso-backed storage for Compass.
//!
//! Architecture:
//!   - Database file: .compass/compass.db (configurable)
//!   - WAL mode: Write-Ahead Logging for concurrent reads during writes
//!   - Schema: data_sources, metrics_groups, metrics, metric_executions
//!   - Cascades are performed explicitly inside transactions
//!
//! Floating-point columns are stored as TEXT so values round-trip exactly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compass_core::{
    CompassError, DataSource, Health, Metric, MetricExecution, MetricFilter, MetricsGroup,
    MetricsGroupUpdate, Result,
};
use std::path::Path;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, instrument};
use turso::{params, Builder, Connection};
use uuid::Uuid;

use crate::repository::{DataSourceRepository, MetricExecutionRepository, MetricsGroupRepository};

/// Database errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl From<DbError> for CompassError {
    fn from(err: DbError) -> Self {
        CompassError::Persistence(err.to_string())
    }
}

type DbResult<T> = std::result::Result<T, DbError>;

const DATA_SOURCE_COLUMNS: &str =
    "id, name, workspace_id, plugin_src, sealed_data, health, created_at, deleted_at";

const METRIC_COLUMNS: &str = "m.id, m.metrics_group_id, m.data_source_id, m.nickname, m.query, \
     m.metric, m.filters, m.group_by, m.condition, m.threshold, m.circle_id, m.created_at, \
     e.id, e.last_value, e.status, e.created_at";

const EXECUTION_COLUMNS: &str = "id, metric_id, last_value, status, created_at";

/// Storage backend on a local Turso database
pub struct TursoStore {
    conn: Mutex<Option<Connection>>,
    path: String,
}

impl TursoStore {
    /// Open (and create if needed) the database at `path` and initialize the schema
    pub async fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;

        let store = TursoStore {
            conn: Mutex::new(Some(conn)),
            path: path_str,
        };
        store.init_schema().await?;

        debug!("Opened compass database at {}", store.path);
        Ok(store)
    }

    /// Returns the database file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Drop the connection; every later call fails with a persistence error
    pub async fn close(&self) {
        self.conn.lock().await.take();
        debug!("Closed compass database at {}", self.path);
    }

    async fn connection(&self) -> DbResult<MappedMutexGuard<'_, Connection>> {
        let guard = self.conn.lock().await;
        MutexGuard::try_map(guard, |conn| conn.as_mut()).map_err(|_| DbError::Closed)
    }

    /// Create tables and indexes; idempotent
    pub async fn init_schema(&self) -> DbResult<()> {
        let statements = vec![
            r#"CREATE TABLE IF NOT EXISTS data_sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                plugin_src TEXT NOT NULL,
                sealed_data TEXT NOT NULL,
                health TEXT NOT NULL DEFAULT 'UNKNOWN',
                created_at TEXT NOT NULL,
                deleted_at TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS metrics_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                circle_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS metrics (
                id TEXT PRIMARY KEY,
                metrics_group_id TEXT NOT NULL,
                data_source_id TEXT NOT NULL,
                nickname TEXT NOT NULL,
                query TEXT NOT NULL,
                metric TEXT NOT NULL,
                filters TEXT NOT NULL,
                group_by TEXT NOT NULL,
                condition TEXT NOT NULL,
                threshold TEXT NOT NULL,
                circle_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS metric_executions (
                id TEXT PRIMARY KEY,
                metric_id TEXT NOT NULL UNIQUE,
                last_value TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_data_sources_workspace ON data_sources(workspace_id, health)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_group ON metrics(metrics_group_id)",
        ];

        let conn = self.connection().await?;
        for stmt in statements {
            conn.execute(stmt, params![]).await?;
        }

        Ok(())
    }

    async fn load_metrics(&self, conn: &Connection, group_id: &str) -> DbResult<Vec<Metric>> {
        let query = format!(
            "SELECT {} FROM metrics m JOIN metric_executions e ON e.metric_id = m.id
             WHERE m.metrics_group_id = ?
             ORDER BY m.created_at ASC, m.rowid ASC",
            METRIC_COLUMNS
        );
        let mut rows = conn.query(&query, params![group_id]).await?;
        let mut metrics = Vec::new();
        while let Some(row) = rows.next().await? {
            metrics.push(parse_metric_row(&row)?);
        }
        Ok(metrics)
    }

    async fn load_group_rows(&self, conn: &Connection, id: Option<Uuid>) -> DbResult<Vec<MetricsGroup>> {
        let mut groups = Vec::new();
        let base = "SELECT id, name, workspace_id, circle_id, created_at FROM metrics_groups";
        let mut rows = match id {
            Some(id) => {
                conn.query(&format!("{} WHERE id = ?", base), params![id.to_string()])
                    .await?
            }
            None => {
                conn.query(&format!("{} ORDER BY created_at ASC, rowid ASC", base), params![])
                    .await?
            }
        };

        while let Some(row) = rows.next().await? {
            let created_at: String = row.get(4)?;
            groups.push(MetricsGroup {
                id: parse_uuid(&row.get::<String>(0)?)?,
                name: row.get(1)?,
                metrics: Vec::new(),
                workspace_id: parse_uuid(&row.get::<String>(2)?)?,
                circle_id: parse_uuid(&row.get::<String>(3)?)?,
                created_at: parse_time(&created_at)?,
            });
        }
        drop(rows);

        for group in &mut groups {
            group.metrics = self.load_metrics(conn, &group.id.to_string()).await?;
        }
        Ok(groups)
    }
}

const INSERT_METRIC: &str = r#"INSERT INTO metrics (
        id, metrics_group_id, data_source_id, nickname, query, metric,
        filters, group_by, condition, threshold, circle_id, created_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

const INSERT_EXECUTION: &str =
    "INSERT INTO metric_executions (id, metric_id, last_value, status, created_at) VALUES (?, ?, ?, ?, ?)";

fn condition_text(metric: &Metric) -> String {
    metric
        .condition
        .map(|condition| condition.to_string())
        .unwrap_or_default()
}

/// Parameters for the metric row and its execution row
fn metric_params(metric: &Metric) -> DbResult<(Vec<turso::Value>, Vec<turso::Value>)> {
    let metric_row: Vec<turso::Value> = vec![
        metric.id.to_string().into(),
        metric.metrics_group_id.to_string().into(),
        metric.data_source_id.to_string().into(),
        metric.nickname.clone().into(),
        metric.query.clone().into(),
        metric.metric.clone().into(),
        serde_json::to_string(&metric.filters)?.into(),
        serde_json::to_string(&metric.group_by)?.into(),
        condition_text(metric).into(),
        metric.threshold.to_string().into(),
        metric.circle_id.to_string().into(),
        metric.created_at.to_rfc3339().into(),
    ];

    let execution = &metric.execution;
    let execution_row: Vec<turso::Value> = vec![
        execution.id.to_string().into(),
        metric.id.to_string().into(),
        execution.last_value.to_string().into(),
        execution.status.to_string().into(),
        execution.created_at.to_rfc3339().into(),
    ];

    Ok((metric_row, execution_row))
}

#[async_trait]
impl DataSourceRepository for TursoStore {
    #[instrument(skip(self, source), fields(id = %source.id))]
    async fn insert_data_source(&self, source: &DataSource) -> Result<()> {
        let conn = self.connection().await?;
        conn.execute(
            &format!(
                "INSERT INTO data_sources ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                DATA_SOURCE_COLUMNS
            ),
            params![
                source.id.to_string(),
                source.name.clone(),
                source.workspace_id.to_string(),
                source.plugin_src.clone(),
                source.sealed_data.clone(),
                source.health.to_string(),
                source.created_at.to_rfc3339(),
                source.deleted_at.map(|dt| dt.to_rfc3339()),
            ],
        )
        .await
        .map_err(DbError::from)?;
        Ok(())
    }

    async fn find_data_source(&self, id: Uuid) -> Result<Option<DataSource>> {
        let conn = self.connection().await?;
        let query = format!(
            "SELECT {} FROM data_sources WHERE id = ? AND deleted_at IS NULL",
            DATA_SOURCE_COLUMNS
        );
        let mut rows = conn
            .query(&query, params![id.to_string()])
            .await
            .map_err(DbError::from)?;

        match rows.next().await.map_err(DbError::from)? {
            Some(row) => Ok(Some(parse_data_source_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_data_sources(
        &self,
        workspace_id: Uuid,
        health: Option<Health>,
    ) -> Result<Vec<DataSource>> {
        let conn = self.connection().await?;
        let mut query = format!(
            "SELECT {} FROM data_sources WHERE workspace_id = ? AND deleted_at IS NULL",
            DATA_SOURCE_COLUMNS
        );
        let mut params_vec: Vec<turso::Value> = vec![workspace_id.to_string().into()];

        if let Some(health) = health {
            query.push_str(" AND health = ?");
            params_vec.push(health.to_string().into());
        }
        query.push_str(" ORDER BY created_at ASC, name ASC");

        let mut rows = conn.query(&query, params_vec).await.map_err(DbError::from)?;
        let mut sources = Vec::new();
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            sources.push(parse_data_source_row(&row)?);
        }
        Ok(sources)
    }

    async fn set_data_source_health(&self, id: Uuid, health: Health) -> Result<bool> {
        let conn = self.connection().await?;
        let changed = conn
            .execute(
                "UPDATE data_sources SET health = ? WHERE id = ? AND deleted_at IS NULL",
                params![health.to_string(), id.to_string()],
            )
            .await
            .map_err(DbError::from)?;
        Ok(changed > 0)
    }

    #[instrument(skip(self))]
    async fn soft_delete_data_source(&self, id: Uuid, deleted_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.connection().await?;
        let changed = conn
            .execute(
                "UPDATE data_sources SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
                params![deleted_at.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(DbError::from)?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl MetricsGroupRepository for TursoStore {
    #[instrument(skip(self, group), fields(id = %group.id, metrics = group.metrics.len()))]
    async fn insert_metrics_group(&self, group: &MetricsGroup) -> Result<()> {
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await.map_err(DbError::from)?;

        tx.execute(
            "INSERT INTO metrics_groups (id, name, workspace_id, circle_id, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                group.id.to_string(),
                group.name.clone(),
                group.workspace_id.to_string(),
                group.circle_id.to_string(),
                group.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(DbError::from)?;

        for metric in &group.metrics {
            let (metric_row, execution_row) = metric_params(metric)?;
            tx.execute(INSERT_METRIC, metric_row)
                .await
                .map_err(DbError::from)?;
            tx.execute(INSERT_EXECUTION, execution_row)
                .await
                .map_err(DbError::from)?;
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn list_metrics_groups(&self) -> Result<Vec<MetricsGroup>> {
        let conn = self.connection().await?;
        Ok(self.load_group_rows(&conn, None).await?)
    }

    async fn find_metrics_group(&self, id: Uuid) -> Result<Option<MetricsGroup>> {
        let conn = self.connection().await?;
        Ok(self.load_group_rows(&conn, Some(id)).await?.into_iter().next())
    }

    async fn update_metrics_group(&self, id: Uuid, update: &MetricsGroupUpdate) -> Result<bool> {
        let conn = self.connection().await?;
        let changed = conn
            .execute(
                "UPDATE metrics_groups SET name = ?, circle_id = ? WHERE id = ?",
                params![update.name.clone(), update.circle_id.to_string(), id.to_string()],
            )
            .await
            .map_err(DbError::from)?;
        Ok(changed > 0)
    }

    #[instrument(skip(self))]
    async fn delete_metrics_group(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.connection().await?;

        // Held guard keeps these ids stable until the transaction commits
        let mut metric_ids = Vec::new();
        let mut rows = conn
            .query(
                "SELECT id FROM metrics WHERE metrics_group_id = ?",
                params![id.to_string()],
            )
            .await
            .map_err(DbError::from)?;
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            let metric_id: String = row.get(0).map_err(DbError::from)?;
            metric_ids.push(metric_id);
        }
        drop(rows);

        let tx = conn.transaction().await.map_err(DbError::from)?;
        for metric_id in metric_ids {
            tx.execute(
                "DELETE FROM metric_executions WHERE metric_id = ?",
                params![metric_id.clone()],
            )
            .await
            .map_err(DbError::from)?;
            tx.execute("DELETE FROM metrics WHERE id = ?", params![metric_id])
                .await
                .map_err(DbError::from)?;
        }

        let changed = tx
            .execute("DELETE FROM metrics_groups WHERE id = ?", params![id.to_string()])
            .await
            .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(changed > 0)
    }

    async fn insert_metric(&self, metric: &Metric) -> Result<()> {
        let mut conn = self.connection().await?;

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM metrics_groups WHERE id = ?",
                params![metric.metrics_group_id.to_string()],
            )
            .await
            .map_err(DbError::from)?;
        let exists = match rows.next().await.map_err(DbError::from)? {
            Some(row) => row.get::<i64>(0).map_err(DbError::from)? > 0,
            None => false,
        };
        drop(rows);
        if !exists {
            return Err(CompassError::not_found(
                "Metrics group",
                metric.metrics_group_id,
            ));
        }

        let (metric_row, execution_row) = metric_params(metric)?;
        let tx = conn.transaction().await.map_err(DbError::from)?;
        tx.execute(INSERT_METRIC, metric_row)
            .await
            .map_err(DbError::from)?;
        tx.execute(INSERT_EXECUTION, execution_row)
            .await
            .map_err(DbError::from)?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn find_metric(&self, id: Uuid) -> Result<Option<Metric>> {
        let conn = self.connection().await?;
        let query = format!(
            "SELECT {} FROM metrics m JOIN metric_executions e ON e.metric_id = m.id WHERE m.id = ?",
            METRIC_COLUMNS
        );
        let mut rows = conn
            .query(&query, params![id.to_string()])
            .await
            .map_err(DbError::from)?;

        match rows.next().await.map_err(DbError::from)? {
            Some(row) => Ok(Some(parse_metric_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_metric(&self, metric: &Metric) -> Result<bool> {
        let conn = self.connection().await?;
        let changed = conn
            .execute(
                r#"UPDATE metrics SET
                    data_source_id = ?, nickname = ?, query = ?, metric = ?,
                    filters = ?, group_by = ?, condition = ?, threshold = ?, circle_id = ?
                WHERE id = ?"#,
                params![
                    metric.data_source_id.to_string(),
                    metric.nickname.clone(),
                    metric.query.clone(),
                    metric.metric.clone(),
                    serde_json::to_string(&metric.filters).map_err(DbError::from)?,
                    serde_json::to_string(&metric.group_by).map_err(DbError::from)?,
                    condition_text(metric),
                    metric.threshold.to_string(),
                    metric.circle_id.to_string(),
                    metric.id.to_string(),
                ],
            )
            .await
            .map_err(DbError::from)?;
        Ok(changed > 0)
    }

    async fn delete_metric(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await.map_err(DbError::from)?;
        tx.execute(
            "DELETE FROM metric_executions WHERE metric_id = ?",
            params![id.to_string()],
        )
        .await
        .map_err(DbError::from)?;
        let changed = tx
            .execute("DELETE FROM metrics WHERE id = ?", params![id.to_string()])
            .await
            .map_err(DbError::from)?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl MetricExecutionRepository for TursoStore {
    async fn list_metric_executions(&self) -> Result<Vec<MetricExecution>> {
        let conn = self.connection().await?;
        let query = format!(
            "SELECT {} FROM metric_executions ORDER BY created_at ASC, rowid ASC",
            EXECUTION_COLUMNS
        );
        let mut rows = conn.query(&query, params![]).await.map_err(DbError::from)?;

        let mut executions = Vec::new();
        while let Some(row) = rows.next().await.map_err(DbError::from)? {
            executions.push(parse_execution_row(&row, 0)?);
        }
        Ok(executions)
    }

    async fn find_metric_execution(&self, metric_id: Uuid) -> Result<Option<MetricExecution>> {
        let conn = self.connection().await?;
        let query = format!(
            "SELECT {} FROM metric_executions WHERE metric_id = ?",
            EXECUTION_COLUMNS
        );
        let mut rows = conn
            .query(&query, params![metric_id.to_string()])
            .await
            .map_err(DbError::from)?;

        match rows.next().await.map_err(DbError::from)? {
            Some(row) => Ok(Some(parse_execution_row(&row, 0)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, execution), fields(metric = %execution.metric_id, status = %execution.status))]
    async fn update_metric_execution(&self, execution: &MetricExecution) -> Result<bool> {
        let conn = self.connection().await?;
        let changed = conn
            .execute(
                "UPDATE metric_executions SET last_value = ?, status = ? WHERE id = ?",
                params![
                    execution.last_value.to_string(),
                    execution.status.to_string(),
                    execution.id.to_string(),
                ],
            )
            .await
            .map_err(DbError::from)?;
        Ok(changed > 0)
    }
}

fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Other(format!("failed to parse id {}: {}", s, e)))
}

fn parse_time(s: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Other(format!("failed to parse timestamp: {}", e)))
}

fn parse_float(s: &str) -> DbResult<f64> {
    s.parse()
        .map_err(|e| DbError::Other(format!("failed to parse number {}: {}", s, e)))
}

fn parse_data_source_row(row: &turso::Row) -> DbResult<DataSource> {
    let health: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let deleted_at: Option<String> = row.get(7)?;

    Ok(DataSource {
        id: parse_uuid(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        workspace_id: parse_uuid(&row.get::<String>(2)?)?,
        plugin_src: row.get(3)?,
        sealed_data: row.get(4)?,
        health: health.parse().map_err(DbError::Other)?,
        created_at: parse_time(&created_at)?,
        deleted_at: deleted_at.map(|s| parse_time(&s)).transpose()?,
    })
}

/// Parse the five execution columns starting at `offset`
fn parse_execution_row(row: &turso::Row, offset: usize) -> DbResult<MetricExecution> {
    let last_value: String = row.get(offset + 2)?;
    let status: String = row.get(offset + 3)?;
    let created_at: String = row.get(offset + 4)?;

    Ok(MetricExecution {
        id: parse_uuid(&row.get::<String>(offset)?)?,
        metric_id: parse_uuid(&row.get::<String>(offset + 1)?)?,
        last_value: parse_float(&last_value)?,
        status: status.parse().map_err(DbError::Other)?,
        created_at: parse_time(&created_at)?,
    })
}

fn parse_metric_row(row: &turso::Row) -> DbResult<Metric> {
    let id = parse_uuid(&row.get::<String>(0)?)?;
    let filters_json: String = row.get(6)?;
    let group_by_json: String = row.get(7)?;
    let condition: String = row.get(8)?;
    let threshold: String = row.get(9)?;
    let created_at: String = row.get(11)?;

    let execution_last_value: String = row.get(13)?;
    let execution_status: String = row.get(14)?;
    let execution_created_at: String = row.get(15)?;

    let filters: Vec<MetricFilter> = serde_json::from_str(&filters_json)?;
    let group_by: Vec<String> = serde_json::from_str(&group_by_json)?;

    Ok(Metric {
        id,
        metrics_group_id: parse_uuid(&row.get::<String>(1)?)?,
        data_source_id: parse_uuid(&row.get::<String>(2)?)?,
        nickname: row.get(3)?,
        query: row.get(4)?,
        metric: row.get(5)?,
        filters,
        group_by,
        condition: if condition.is_empty() {
            None
        } else {
            Some(condition.parse().map_err(DbError::Other)?)
        },
        threshold: parse_float(&threshold)?,
        circle_id: parse_uuid(&row.get::<String>(10)?)?,
        execution: MetricExecution {
            id: parse_uuid(&row.get::<String>(12)?)?,
            metric_id: id,
            last_value: parse_float(&execution_last_value)?,
            status: execution_status.parse().map_err(DbError::Other)?,
            created_at: parse_time(&execution_created_at)?,
        },
        created_at: parse_time(&created_at)?,
    })
}
