//! Partial-aggregate store client for the alert evaluation engine.
//!
//! The default implementation ([`engine::SqliteMetricStore`]) uses daily
//! time-partitioned SQLite databases with WAL mode. Raw points are folded
//! into mergeable partial-aggregate states per (metric, minute, group), and
//! a per-partition block checkpoint lets repeated evaluations merge only
//! newly committed blocks. Alert definitions live in a separate
//! single-file database ([`definitions::AlertDefinitionStore`]).

pub mod aggregate;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod filter;
pub mod partition;
pub mod state_store;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use vigil_common::types::{
    AlertDefinition, AlertStateChange, Aggregator, BlockCheckpoint, MetricBucket, ProductType,
};

/// Checkpoint context for an incremental read: which metric's saved state
/// the read should extend, and the block markers already merged.
///
/// The markers are advisory; the store gates merging on its own persisted
/// marker so a replayed read never double-counts.
#[derive(Debug, Clone)]
pub struct SavedMetricState {
    pub metric_id: String,
    pub checkpoints: Vec<BlockCheckpoint>,
}

/// Parameters for the primary aggregate read.
#[derive(Debug, Clone)]
pub struct ReadMetricsInput {
    pub product: ProductType,
    pub project_id: i64,
    /// Conjunction filter over point labels (see [`filter`]).
    pub query: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Numeric label to aggregate; `None` aggregates the point value.
    pub column: Option<String>,
    pub aggregator: Aggregator,
    pub group_by: Vec<String>,
    pub bucket_count: usize,
    /// Keep only the top `limit` groups by event count.
    pub limit: usize,
    /// When set, new blocks are merged into the metric's saved state as a
    /// side effect of the read.
    pub saved_state: Option<SavedMetricState>,
}

/// Read interface over the columnar metric store.
///
/// Implementations must be safe to share across threads (`Send + Sync`):
/// evaluation tasks run concurrently on the worker pool.
pub trait MetricStore: Send + Sync {
    /// Executes the primary aggregate read: filtered, grouped, bucketed,
    /// limited to the top groups by event count. When
    /// [`ReadMetricsInput::saved_state`] is set, partial states for blocks
    /// beyond the stored checkpoint are merged into the metric's history.
    fn read_metrics(&self, input: &ReadMetricsInput) -> Result<Vec<MetricBucket>>;

    /// Returns the highest merged block marker per calendar-day partition
    /// for the given metric over the time range.
    fn block_checkpoints(
        &self,
        metric_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BlockCheckpoint>>;

    /// Re-aggregates saved partial states over `[end - interval, end)`,
    /// producing one bucket per group, or per (group, sub-bucket) when
    /// `window_seconds` is set.
    fn aggregate_metric_states(
        &self,
        metric_id: &str,
        end: DateTime<Utc>,
        interval: Duration,
        aggregator: Aggregator,
        window_seconds: Option<i64>,
    ) -> Result<Vec<MetricBucket>>;
}

/// Persistence for per-(alert, group) state transitions.
pub trait AlertStateStore: Send + Sync {
    /// Returns the most recent `Alerting` state change per group key in
    /// `[from, to]` (both ends inclusive, so a replay of the evaluation
    /// minute sees its own prior row). Groups that never alerted are
    /// absent.
    fn last_alerting_states(
        &self,
        project_id: i64,
        alert_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AlertStateChange>>;

    /// Appends state changes for one evaluation cycle. Append-only and
    /// keyed by timestamp, so replays duplicate rows but never disagree.
    fn append_state_changes(&self, project_id: i64, changes: &[AlertStateChange]) -> Result<()>;
}

/// Source of alert definitions, treated as a point-in-time snapshot each
/// cycle; disabled alerts are excluded.
pub trait AlertSource: Send + Sync {
    fn list_enabled_alerts(&self) -> Result<Vec<AlertDefinition>>;
}
