use crate::aggregate::{bucket_index, PartialState};
use crate::filter::Filter;
use crate::partition::PartitionManager;
use crate::{MetricStore, ReadMetricsInput};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use vigil_common::types::{BlockCheckpoint, MetricBucket, MetricPoint, ProductType};

/// Metric store over daily-partitioned SQLite databases.
///
/// Raw points land in the `points` table with a per-batch block number;
/// incremental reads fold new blocks into `metric_history` partial states
/// gated by the `block_checkpoints` marker, so replaying a partition never
/// double-counts.
pub struct SqliteMetricStore {
    partitions: PartitionManager,
}

struct RawRow {
    ts: i64,
    value: Option<f64>,
    labels: HashMap<String, String>,
}

impl SqliteMetricStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }

    pub(crate) fn partitions(&self) -> &PartitionManager {
        &self.partitions
    }

    /// Removes partitions older than `retention_days`.
    pub fn cleanup(&self, retention_days: u32) -> Result<u32> {
        self.partitions.cleanup_older_than(retention_days)
    }

    /// Ingests one batch of points. The batch forms one block per touched
    /// partition and receives that partition's next block number.
    pub fn write_points(
        &self,
        product: ProductType,
        project_id: i64,
        points: &[MetricPoint],
    ) -> Result<()> {
        let mut by_partition: BTreeMap<String, Vec<&MetricPoint>> = BTreeMap::new();
        for point in points {
            let key = self.partitions.get_or_create(point.timestamp)?;
            by_partition.entry(key).or_default().push(point);
        }

        for (key, batch) in by_partition {
            self.partitions.with_partition(&key, |conn| {
                let block: u64 = conn.query_row(
                    "SELECT COALESCE(MAX(block_number), 0) + 1 FROM points",
                    [],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(
                    "INSERT INTO points (product, project_id, timestamp, value, labels, block_number)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for point in &batch {
                    stmt.execute(params![
                        product.to_string(),
                        project_id,
                        point.timestamp.timestamp(),
                        point.value,
                        serde_json::to_string(&point.labels)?,
                        block,
                    ])?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Loads filtered raw rows per partition over the read window.
    fn load_rows(
        &self,
        input: &ReadMetricsInput,
        filter: &Filter,
    ) -> Result<Vec<(String, Vec<RawRow>)>> {
        let keys = self
            .partitions
            .partitions_in_range(input.start_date, input.end_date)?;
        let mut out = Vec::new();
        for key in keys {
            let rows = self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, value, labels FROM points
                     WHERE product = ?1 AND project_id = ?2
                       AND timestamp >= ?3 AND timestamp < ?4",
                )?;
                let mut rows = Vec::new();
                let mut iter = stmt.query(params![
                    input.product.to_string(),
                    input.project_id,
                    input.start_date.timestamp(),
                    input.end_date.timestamp(),
                ])?;
                while let Some(row) = iter.next()? {
                    let labels_json: String = row.get(2)?;
                    let labels: HashMap<String, String> = serde_json::from_str(&labels_json)?;
                    if !filter.matches(&labels) {
                        continue;
                    }
                    rows.push(RawRow {
                        ts: row.get(0)?,
                        value: row.get(1)?,
                        labels,
                    });
                }
                Ok(rows)
            })?;
            out.push((key, rows));
        }
        Ok(out)
    }

    /// Folds rows from blocks beyond the partition's stored checkpoint into
    /// the metric's saved partial states, then advances the marker. Blocks
    /// are merged whole, with no timestamp restriction: a batch may span
    /// timestamps outside the requesting read window, and skipping those
    /// rows while advancing the marker would drop them from the history
    /// for good. The marker gate makes replays idempotent.
    fn merge_new_blocks(
        &self,
        partition_key: &str,
        input: &ReadMetricsInput,
        filter: &Filter,
        metric_id: &str,
    ) -> Result<()> {
        let column = input.column.as_deref();
        self.partitions.with_partition(partition_key, |conn| {
            let marker: u64 = conn
                .query_row(
                    "SELECT last_block_number FROM block_checkpoints WHERE metric_id = ?1",
                    params![metric_id],
                    |row| row.get::<_, i64>(0).map(|v| v as u64),
                )
                .unwrap_or(0);

            let mut stmt = conn.prepare(
                "SELECT timestamp, value, labels, block_number FROM points
                 WHERE product = ?1 AND project_id = ?2 AND block_number > ?3",
            )?;
            let mut iter = stmt.query(params![
                input.product.to_string(),
                input.project_id,
                marker as i64,
            ])?;

            let mut merged: HashMap<(i64, String), PartialState> = HashMap::new();
            let mut max_block = marker;
            while let Some(row) = iter.next()? {
                let block = row.get::<_, i64>(3)? as u64;
                max_block = max_block.max(block);

                let labels_json: String = row.get(2)?;
                let labels: HashMap<String, String> = serde_json::from_str(&labels_json)?;
                if !filter.matches(&labels) {
                    continue;
                }
                let raw = RawRow {
                    ts: row.get(0)?,
                    value: row.get(1)?,
                    labels,
                };
                let minute = raw.ts - raw.ts.rem_euclid(60);
                let group_key = group_values(&raw.labels, &input.group_by).join(",");
                merged.entry((minute, group_key)).or_default().observe(
                    resolve_value(&raw, column),
                    distinct_key(&raw, column).as_deref(),
                );
            }
            if max_block == marker {
                return Ok(());
            }

            for ((minute, group_key), fresh) in merged {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT state FROM metric_history
                         WHERE metric_id = ?1 AND timestamp = ?2 AND group_key = ?3",
                        params![metric_id, minute, group_key],
                        |row| row.get(0),
                    )
                    .ok();
                let mut state = match existing {
                    Some(json) => serde_json::from_str::<PartialState>(&json)?,
                    None => PartialState::default(),
                };
                state.merge(&fresh);
                conn.execute(
                    "INSERT INTO metric_history (metric_id, timestamp, group_key, state)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(metric_id, timestamp, group_key)
                     DO UPDATE SET state = excluded.state",
                    params![metric_id, minute, group_key, serde_json::to_string(&state)?],
                )?;
            }

            // Marker is monotonically non-decreasing per partition.
            conn.execute(
                "INSERT INTO block_checkpoints (metric_id, last_block_number)
                 VALUES (?1, ?2)
                 ON CONFLICT(metric_id)
                 DO UPDATE SET last_block_number =
                     max(last_block_number, excluded.last_block_number)",
                params![metric_id, max_block as i64],
            )?;

            tracing::debug!(
                metric_id,
                partition = partition_key,
                marker = max_block,
                "Merged new blocks into metric history"
            );
            Ok(())
        })
    }
}

impl MetricStore for SqliteMetricStore {
    fn read_metrics(&self, input: &ReadMetricsInput) -> Result<Vec<MetricBucket>> {
        let filter = Filter::parse(&input.query)?;
        let partitions = self.load_rows(input, &filter)?;

        if let Some(saved) = &input.saved_state {
            for (key, _) in &partitions {
                self.merge_new_blocks(key, input, &filter, &saved.metric_id)?;
            }
        }

        let start_secs = input.start_date.timestamp();
        let window_secs = (input.end_date - input.start_date).num_seconds();
        let width = (window_secs / input.bucket_count.max(1) as i64).max(1);

        // Top-N groups by event count; stable tie-break on group key.
        let mut group_counts: HashMap<Vec<String>, u64> = HashMap::new();
        for (_, rows) in &partitions {
            for row in rows {
                *group_counts
                    .entry(group_values(&row.labels, &input.group_by))
                    .or_default() += 1;
            }
        }
        let mut ranked: Vec<(Vec<String>, u64)> = group_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(input.limit);
        let kept: std::collections::HashSet<Vec<String>> =
            ranked.into_iter().map(|(g, _)| g).collect();

        let mut states: BTreeMap<(Vec<String>, u64), PartialState> = BTreeMap::new();
        for (_, rows) in &partitions {
            for row in rows {
                let group = group_values(&row.labels, &input.group_by);
                if !kept.contains(&group) {
                    continue;
                }
                let bucket = bucket_index(start_secs, row.ts, width);
                states.entry((group, bucket)).or_default().observe(
                    resolve_value(row, input.column.as_deref()),
                    distinct_key(row, input.column.as_deref()).as_deref(),
                );
            }
        }

        let buckets = states
            .into_iter()
            .map(|((group, bucket_id), state)| MetricBucket {
                bucket_id,
                bucket_min: start_secs + bucket_id as i64 * width,
                bucket_max: start_secs + (bucket_id as i64 + 1) * width,
                group,
                value: state.finalize(input.aggregator),
                yhat_lower: None,
                yhat_upper: None,
            })
            .collect();
        Ok(buckets)
    }

    fn block_checkpoints(
        &self,
        metric_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BlockCheckpoint>> {
        let keys = self.partitions.partitions_in_range(from, to)?;
        let mut out = Vec::new();
        for key in keys {
            let marker: Option<u64> = self.partitions.with_partition(&key, |conn| {
                let marker = conn
                    .query_row(
                        "SELECT last_block_number FROM block_checkpoints WHERE metric_id = ?1",
                        params![metric_id],
                        |row| row.get::<_, i64>(0).map(|v| v as u64),
                    )
                    .ok();
                Ok(marker)
            })?;
            if let Some(last_block_number) = marker {
                out.push(BlockCheckpoint {
                    partition: key,
                    last_block_number,
                });
            }
        }
        Ok(out)
    }

    fn aggregate_metric_states(
        &self,
        metric_id: &str,
        end: DateTime<Utc>,
        interval: Duration,
        aggregator: vigil_common::types::Aggregator,
        window_seconds: Option<i64>,
    ) -> Result<Vec<MetricBucket>> {
        let start = end - interval;
        let start_secs = start.timestamp();
        let end_secs = end.timestamp();
        // Non-positive sub-bucket widths disable sub-bucketing.
        let window = window_seconds.filter(|w| *w > 0);

        let mut merged: BTreeMap<(String, u64), PartialState> = BTreeMap::new();
        for key in self.partitions.partitions_in_range(start, end)? {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, group_key, state FROM metric_history
                     WHERE metric_id = ?1 AND timestamp >= ?2 AND timestamp < ?3",
                )?;
                let mut iter = stmt.query(params![metric_id, start_secs, end_secs])?;
                while let Some(row) = iter.next()? {
                    let ts: i64 = row.get(0)?;
                    let group_key: String = row.get(1)?;
                    let state_json: String = row.get(2)?;
                    let state: PartialState = serde_json::from_str(&state_json)?;
                    let bucket = window.map(|w| bucket_index(start_secs, ts, w)).unwrap_or(0);
                    merged.entry((group_key, bucket)).or_default().merge(&state);
                }
                Ok(())
            })?;
        }

        let buckets = merged
            .into_iter()
            .map(|((group_key, bucket_id), state)| {
                let (bucket_min, bucket_max) = match window {
                    Some(w) => (
                        start_secs + bucket_id as i64 * w,
                        start_secs + (bucket_id as i64 + 1) * w,
                    ),
                    None => (start_secs, end_secs),
                };
                MetricBucket {
                    bucket_id,
                    bucket_min,
                    bucket_max,
                    group: vec![group_key],
                    value: state.finalize(aggregator),
                    yhat_lower: None,
                    yhat_upper: None,
                }
            })
            .collect();
        Ok(buckets)
    }
}

fn group_values(labels: &HashMap<String, String>, group_by: &[String]) -> Vec<String> {
    group_by
        .iter()
        .map(|key| labels.get(key).cloned().unwrap_or_default())
        .collect()
}

fn resolve_value(row: &RawRow, column: Option<&str>) -> Option<f64> {
    match column {
        Some(col) if !col.is_empty() => row.labels.get(col).and_then(|v| v.parse().ok()),
        _ => row.value,
    }
}

/// Identity used for distinct counting: the selected label when a column
/// is configured, otherwise the formatted point value.
fn distinct_key(row: &RawRow, column: Option<&str>) -> Option<String> {
    match column {
        Some(col) if !col.is_empty() => row.labels.get(col).cloned(),
        _ => row.value.map(|v| v.to_string()),
    }
}
