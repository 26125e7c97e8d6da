//! Core type definitions for Compass metric evaluation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::validation::ValidationErrors;
use crate::Result;

/// Health of a data source as reported by the external health checker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HEALTHY" => Ok(Self::Healthy),
            "UNHEALTHY" => Ok(Self::Unhealthy),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Invalid health: {}", s)),
        }
    }
}

/// Lifecycle status of a metric execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Metric is being watched
    #[default]
    Active,
    /// Condition has been satisfied
    Reached,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Reached => write!(f, "REACHED"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "REACHED" => Ok(Self::Reached),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

/// Comparison between an observed value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    #[serde(alias = "=")]
    Equal,
    #[serde(alias = ">", alias = "GREATER_THEN")]
    GreaterThan,
    #[serde(alias = "<", alias = "LOWER_THEN")]
    LessThan,
}

impl Condition {
    /// Whether `value` satisfies this condition against `threshold`
    pub fn is_met(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Equal => value == threshold,
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => write!(f, "EQUAL"),
            Self::GreaterThan => write!(f, "GREATER_THAN"),
            Self::LessThan => write!(f, "LESS_THAN"),
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EQUAL" | "=" => Ok(Self::Equal),
            "GREATER_THAN" | "GREATER_THEN" | ">" => Ok(Self::GreaterThan),
            "LESS_THAN" | "LOWER_THEN" | "<" => Ok(Self::LessThan),
            _ => Err(format!("Invalid condition: {}", s)),
        }
    }
}

/// Label match operator used by metric filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[default]
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "=~")]
    Matches,
    #[serde(rename = "!~")]
    NotMatches,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Matches => "=~",
            Self::NotMatches => "!~",
        }
    }
}

/// A filter predicate applied to the queried metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFilter {
    pub field: String,
    #[serde(default)]
    pub operator: FilterOperator,
    pub value: String,
}

impl MetricFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Equal,
            value: value.into(),
        }
    }

    pub fn with_operator(mut self, operator: FilterOperator) -> Self {
        self.operator = operator;
        self
    }
}

/// Connection to a telemetry backend
///
/// `sealed_data` holds the encrypted connection configuration. It is only
/// opened at query time; see [`DecryptedDataSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    pub workspace_id: Uuid,
    /// Driver type identifier, e.g. `prometheus`
    pub plugin_src: String,
    pub sealed_data: String,
    pub health: Health,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DataSource {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a data source; `data` is the cleartext configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataSource {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workspace_id: Uuid,
    #[serde(default)]
    pub plugin_src: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NewDataSource {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.check(self.name.trim().is_empty(), "name", "Name is required");
        errors.check(self.workspace_id.is_nil(), "workspaceId", "WorkspaceID is required");
        errors.check(
            self.plugin_src.trim().is_empty(),
            "pluginSrc",
            "PluginSrc is required",
        );
        errors
    }
}

/// A data source together with its opened connection configuration
#[derive(Debug, Clone)]
pub struct DecryptedDataSource {
    pub source: DataSource,
    pub config: serde_json::Value,
}

impl DecryptedDataSource {
    /// Connection configuration in the serialized form handed to drivers
    pub fn connection_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.config)?)
    }
}

/// Runtime state of a metric across evaluation cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricExecution {
    pub id: Uuid,
    pub metric_id: Uuid,
    pub last_value: f64,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
}

impl MetricExecution {
    /// Fresh ACTIVE execution with a zero value
    pub fn new(metric_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric_id,
            last_value: 0.0,
            status: ExecutionStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Answered from the stored status only
    pub fn is_reached(&self) -> bool {
        self.status == ExecutionStatus::Reached
    }
}

impl Default for MetricExecution {
    fn default() -> Self {
        Self::new(Uuid::nil())
    }
}

/// Query-relevant fields of a metric, as handed to drivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub query: String,
    pub metric: String,
    pub filters: Vec<MetricFilter>,
    pub group_by: Vec<String>,
}

impl QuerySpec {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A metric watched for one circle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub metrics_group_id: Uuid,
    #[serde(default)]
    pub data_source_id: Uuid,
    #[serde(default)]
    pub nickname: String,
    /// Raw backend query; takes precedence over `metric` when set
    #[serde(default)]
    pub query: String,
    /// Target metric name within the backend
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub filters: Vec<MetricFilter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    /// `None` when the document omits the condition or names an unknown one
    #[serde(default, deserialize_with = "lenient_condition")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub circle_id: Uuid,
    #[serde(default)]
    pub execution: MetricExecution,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Metric {
    pub fn new(
        data_source_id: Uuid,
        nickname: impl Into<String>,
        metric: impl Into<String>,
        condition: Condition,
        threshold: f64,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            metrics_group_id: Uuid::nil(),
            data_source_id,
            nickname: nickname.into(),
            query: String::new(),
            metric: metric.into(),
            filters: Vec::new(),
            group_by: Vec::new(),
            condition: Some(condition),
            threshold,
            circle_id: Uuid::nil(),
            execution: MetricExecution::new(id),
            created_at: Utc::now(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_filter(mut self, filter: MetricFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    /// Key under which this metric's result is reported
    pub fn result_key(&self) -> &str {
        if self.metric.is_empty() {
            &self.nickname
        } else {
            &self.metric
        }
    }

    pub fn query_spec(&self) -> QuerySpec {
        QuerySpec {
            query: self.query.clone(),
            metric: self.metric.clone(),
            filters: self.filters.clone(),
            group_by: self.group_by.clone(),
        }
    }

    /// Whether `value` satisfies this metric's condition
    pub fn is_met(&self, value: f64) -> bool {
        self.condition
            .is_some_and(|condition| condition.is_met(value, self.threshold))
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.check(self.nickname.trim().is_empty(), "nickname", "Nickname is required");
        errors.check(
            self.data_source_id.is_nil(),
            "dataSourceId",
            "DataSourceID is required",
        );
        errors.check(
            self.metric.trim().is_empty() && self.query.trim().is_empty(),
            "metric",
            "Metric or query is required",
        );
        errors.check(self.condition.is_none(), "condition", "Condition is required");
        errors.check(
            !self.threshold.is_finite(),
            "threshold",
            "Threshold must be a finite number",
        );
        errors
    }
}

fn lenient_condition<'de, D>(deserializer: D) -> std::result::Result<Option<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

/// Metrics evaluated together for one circle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsGroup {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub workspace_id: Uuid,
    #[serde(default)]
    pub circle_id: Uuid,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MetricsGroup {
    pub fn new(name: impl Into<String>, workspace_id: Uuid, circle_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            metrics: Vec::new(),
            workspace_id,
            circle_id,
            created_at: Utc::now(),
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Decode the external JSON representation
    ///
    /// Missing fields decode to empty values so that [`validate`](Self::validate)
    /// can report them.
    pub fn parse(document: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(document)?)
    }

    /// Validate the group and every metric, collecting all violations
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.check(self.name.trim().is_empty(), "name", "Name is required");
        errors.check(self.metrics.is_empty(), "metrics", "Metrics is required");
        errors.check(self.circle_id.is_nil(), "circleId", "CircleID is required");

        for (index, metric) in self.metrics.iter().enumerate() {
            errors.nest(&format!("metrics[{}]", index), metric.validate());
        }

        errors
    }

    /// Attach every metric (and its execution) to this group
    pub fn adopt_metrics(&mut self) {
        for metric in &mut self.metrics {
            metric.metrics_group_id = self.id;
            if metric.circle_id.is_nil() {
                metric.circle_id = self.circle_id;
            }
            metric.execution = MetricExecution::new(metric.id);
        }
    }
}

/// Typed update of a metrics group's own fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsGroupUpdate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub circle_id: Uuid,
}

impl MetricsGroupUpdate {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.check(self.name.trim().is_empty(), "name", "Name is required");
        errors.check(self.circle_id.is_nil(), "circleId", "CircleID is required");
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_semantics() {
        let samples = [-3.5, -1.0, 0.0, 0.5, 1.0, 5.0, 1e9];

        for &v in &samples {
            for &t in &samples {
                assert_eq!(Condition::Equal.is_met(v, t), v == t, "EQUAL {} {}", v, t);
                assert_eq!(Condition::GreaterThan.is_met(v, t), v > t, "GT {} {}", v, t);
                assert_eq!(Condition::LessThan.is_met(v, t), v < t, "LT {} {}", v, t);
            }
        }

        assert!(Condition::Equal.is_met(0.0, -0.0));
        assert!(!Condition::GreaterThan.is_met(-0.0, 0.0));
    }

    #[test]
    fn test_condition_aliases() {
        let parsed: Vec<Condition> =
            serde_json::from_str(r#"["=", ">", "<", "GREATER_THEN", "LOWER_THEN", "LESS_THAN"]"#)
                .unwrap();
        assert_eq!(
            parsed,
            vec![
                Condition::Equal,
                Condition::GreaterThan,
                Condition::LessThan,
                Condition::GreaterThan,
                Condition::LessThan,
                Condition::LessThan,
            ]
        );
        assert_eq!("greater_than".parse::<Condition>().unwrap(), Condition::GreaterThan);
        assert!("between".parse::<Condition>().is_err());
    }

    #[test]
    fn test_validate_reports_each_group_rule() {
        let group = MetricsGroup::new("", Uuid::new_v4(), Uuid::nil());

        let errors = group.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("name"));
        assert!(errors.has_field("metrics"));
        assert!(errors.has_field("circleId"));
    }

    #[test]
    fn test_validate_collects_nested_metric_errors() {
        let bad_metric = Metric::new(Uuid::nil(), "", "", Condition::Equal, f64::NAN);
        let group = MetricsGroup::new("group 1", Uuid::new_v4(), Uuid::new_v4())
            .with_metric(bad_metric);

        let errors = group.validate();
        assert_eq!(errors.len(), 4);
        assert!(errors.has_field("metrics[0].nickname"));
        assert!(errors.has_field("metrics[0].dataSourceId"));
        assert!(errors.has_field("metrics[0].metric"));
        assert!(errors.has_field("metrics[0].threshold"));
    }

    #[test]
    fn test_parse_document() {
        let circle = Uuid::new_v4();
        let source = Uuid::new_v4();
        let document = format!(
            r#"{{
                "name": "canary latency",
                "workspaceId": "{}",
                "circleId": "{}",
                "metrics": [{{
                    "dataSourceId": "{}",
                    "nickname": "p99",
                    "metric": "http_latency_p99",
                    "filters": [{{"field": "app", "value": "checkout"}}],
                    "groupBy": ["instance"],
                    "condition": "GREATER_THAN",
                    "threshold": 250.5
                }}]
            }}"#,
            Uuid::new_v4(),
            circle,
            source
        );

        let group = MetricsGroup::parse(document.as_bytes()).unwrap();
        assert_eq!(group.name, "canary latency");
        assert_eq!(group.circle_id, circle);
        assert_eq!(group.metrics.len(), 1);

        let metric = &group.metrics[0];
        assert_eq!(metric.data_source_id, source);
        assert_eq!(metric.condition, Some(Condition::GreaterThan));
        assert_eq!(metric.threshold, 250.5);
        assert_eq!(metric.filters[0].operator, FilterOperator::Equal);
        assert_eq!(metric.group_by, vec!["instance".to_string()]);
        assert!(group.validate().is_empty());
    }

    #[test]
    fn test_parse_missing_fields_left_to_validation() {
        let group = MetricsGroup::parse(br#"{"metrics": []}"#).unwrap();
        assert!(group.workspace_id.is_nil());
        assert_eq!(group.validate().len(), 3);

        assert!(MetricsGroup::parse(b"not json").is_err());
    }

    #[test]
    fn test_parse_missing_condition_reaches_validation() {
        let group = MetricsGroup::parse(
            br#"{"name": "", "metrics": [{"nickname": "n"}, {"nickname": "m", "condition": "BETWEEN"}]}"#,
        )
        .unwrap();
        assert_eq!(group.metrics[0].condition, None);
        assert_eq!(group.metrics[1].condition, None);

        let errors = group.validate();
        assert!(errors.has_field("name"));
        assert!(errors.has_field("circleId"));
        assert!(errors.has_field("metrics[0].condition"));
        assert!(errors.has_field("metrics[1].condition"));
        assert!(errors.has_field("metrics[0].dataSourceId"));
    }

    #[test]
    fn test_metric_without_condition_is_never_met() {
        let mut metric = Metric::new(Uuid::new_v4(), "n", "m", Condition::Equal, 1.0);
        assert!(metric.is_met(1.0));
        metric.condition = None;
        assert!(!metric.is_met(1.0));
    }

    #[test]
    fn test_adopt_metrics() {
        let circle = Uuid::new_v4();
        let mut group = MetricsGroup::new("g", Uuid::new_v4(), circle).with_metric(Metric::new(
            Uuid::new_v4(),
            "errors",
            "http_errors",
            Condition::LessThan,
            2.0,
        ));
        group.adopt_metrics();

        let metric = &group.metrics[0];
        assert_eq!(metric.metrics_group_id, group.id);
        assert_eq!(metric.circle_id, circle);
        assert_eq!(metric.execution.metric_id, metric.id);
        assert_eq!(metric.execution.status, ExecutionStatus::Active);
        assert_eq!(metric.execution.last_value, 0.0);
    }

    #[test]
    fn test_query_spec_wire_shape() {
        let metric = Metric::new(Uuid::new_v4(), "n", "requests", Condition::Equal, 1.0)
            .with_filter(MetricFilter::new("app", "web").with_operator(FilterOperator::NotEqual))
            .with_group_by("pod");

        let value: serde_json::Value =
            serde_json::from_slice(&metric.query_spec().to_bytes().unwrap()).unwrap();
        assert_eq!(value["metric"], "requests");
        assert_eq!(value["groupBy"][0], "pod");
        assert_eq!(value["filters"][0]["operator"], "!=");
    }
}
