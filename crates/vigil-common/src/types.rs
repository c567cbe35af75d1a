use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The product stream an alert is defined over.
///
/// # Examples
///
/// ```
/// use vigil_common::types::ProductType;
///
/// let product: ProductType = "logs".parse().unwrap();
/// assert_eq!(product, ProductType::Logs);
/// assert_eq!(product.to_string(), "logs");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Errors,
    Logs,
    Sessions,
    Metrics,
    Traces,
    Events,
}

impl ProductType {
    /// Whether this product is backed by partial-state columnar storage and
    /// therefore evaluated through the checkpointed incremental path.
    pub fn supports_metric_state(self) -> bool {
        !matches!(self, ProductType::Errors | ProductType::Sessions)
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProductType::Errors => "errors",
            ProductType::Logs => "logs",
            ProductType::Sessions => "sessions",
            ProductType::Metrics => "metrics",
            ProductType::Traces => "traces",
            ProductType::Events => "events",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "errors" => Ok(ProductType::Errors),
            "logs" => Ok(ProductType::Logs),
            "sessions" => Ok(ProductType::Sessions),
            "metrics" => Ok(ProductType::Metrics),
            "traces" => Ok(ProductType::Traces),
            "events" => Ok(ProductType::Events),
            _ => Err(format!("unknown product type: {s}")),
        }
    }
}

/// Aggregation function applied to the metric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Count,
    CountDistinct,
    Min,
    Max,
    Sum,
    Avg,
    P50,
    P90,
    P95,
    P99,
}

impl std::fmt::Display for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Aggregator::Count => "count",
            Aggregator::CountDistinct => "count_distinct",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::P50 => "p50",
            Aggregator::P90 => "p90",
            Aggregator::P95 => "p95",
            Aggregator::P99 => "p99",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Aggregator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "count" => Ok(Aggregator::Count),
            "count_distinct" => Ok(Aggregator::CountDistinct),
            "min" => Ok(Aggregator::Min),
            "max" => Ok(Aggregator::Max),
            "sum" => Ok(Aggregator::Sum),
            "avg" => Ok(Aggregator::Avg),
            "p50" => Ok(Aggregator::P50),
            "p90" => Ok(Aggregator::P90),
            "p95" => Ok(Aggregator::P95),
            "p99" => Ok(Aggregator::P99),
            _ => Err(format!("unknown aggregator: {s}")),
        }
    }
}

/// Fixed numeric bound, or a statistically-forecast bound from the
/// anomaly predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    Constant,
    Anomaly,
}

impl std::fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThresholdType::Constant => "constant",
            ThresholdType::Anomaly => "anomaly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ThresholdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant" => Ok(ThresholdType::Constant),
            "anomaly" => Ok(ThresholdType::Anomaly),
            _ => Err(format!("unknown threshold type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdCondition {
    Above,
    Below,
    Outside,
}

impl std::fmt::Display for ThresholdCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThresholdCondition::Above => "above",
            ThresholdCondition::Below => "below",
            ThresholdCondition::Outside => "outside",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ThresholdCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(ThresholdCondition::Above),
            "below" => Ok(ThresholdCondition::Below),
            "outside" => Ok(ThresholdCondition::Outside),
            _ => Err(format!("unknown threshold condition: {s}")),
        }
    }
}

/// Alert state recorded per (alert, group) on every evaluation cycle.
///
/// `AlertingSilently` marks a true condition inside the cooldown window:
/// the state is persisted but no notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Normal,
    Alerting,
    AlertingSilently,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertState::Normal => "normal",
            AlertState::Alerting => "alerting",
            AlertState::AlertingSilently => "alerting_silently",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(AlertState::Normal),
            "alerting" => Ok(AlertState::Alerting),
            "alerting_silently" => Ok(AlertState::AlertingSilently),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// A user-defined alerting rule, owned by the relational store and
/// read-only to the engine.
///
/// `product_type` is kept as the raw stored string and parsed at evaluation
/// time; an unparseable value is a per-cycle configuration error, not a
/// load-time failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub product_type: String,
    pub function_type: Aggregator,
    /// Numeric label the aggregation reads; empty/None means the point's
    /// own value.
    pub function_column: Option<String>,
    /// User filter, concatenated after the product's default filter.
    pub query: Option<String>,
    /// Identifier of the saved partial-state series for this alert.
    pub metric_id: String,
    pub group_by_key: Option<String>,
    pub threshold_type: ThresholdType,
    pub threshold_condition: ThresholdCondition,
    pub threshold_value: Option<f64>,
    /// Threshold window in seconds (default 1 hour when unset).
    pub threshold_window: Option<i64>,
    /// Cooldown between notifications in seconds (0 when unset).
    pub threshold_cooldown: Option<i64>,
    pub disabled: bool,
}

/// One raw ingested data point. A batch of points forms a block and is
/// assigned a single block number per partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub labels: HashMap<String, String>,
}

/// An aggregated value for one (group, time bucket) pair.
///
/// Produced fresh each evaluation cycle and never persisted; `yhat_lower`
/// and `yhat_upper` are populated by the anomaly predictor when the alert
/// uses anomaly thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBucket {
    pub bucket_id: u64,
    /// Bucket bounds as unix seconds; the predictor uses the midpoint as
    /// the series timestamp.
    pub bucket_min: i64,
    pub bucket_max: i64,
    pub group: Vec<String>,
    pub value: Option<f64>,
    pub yhat_lower: Option<f64>,
    pub yhat_upper: Option<f64>,
}

/// Append-only record of an alert's state for one group at one evaluation
/// instant. The latest `Alerting` row per group is the cooldown baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertStateChange {
    pub timestamp: DateTime<Utc>,
    pub alert_id: i64,
    pub group_by_key: String,
    pub state: AlertState,
}

/// Highest merged block marker for one calendar-day partition of a metric's
/// saved state. Advisory: merging is idempotent regardless, the marker only
/// lets clients skip fully-merged partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCheckpoint {
    pub partition: String,
    pub last_block_number: u64,
}
