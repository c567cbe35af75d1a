use crate::aggregate::{bucket_index, PartialState};
use crate::definitions::AlertDefinitionStore;
use crate::engine::SqliteMetricStore;
use crate::filter::Filter;
use crate::{AlertSource, AlertStateStore, MetricStore, ReadMetricsInput, SavedMetricState};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use tempfile::TempDir;
use vigil_common::types::{
    AlertDefinition, AlertState, AlertStateChange, Aggregator, MetricPoint, ProductType,
    ThresholdCondition, ThresholdType,
};

fn test_store() -> (TempDir, SqliteMetricStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteMetricStore::new(dir.path()).unwrap();
    (dir, store)
}

fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 20, h, m, s).unwrap()
}

fn point(at: DateTime<Utc>, value: Option<f64>, labels: &[(&str, &str)]) -> MetricPoint {
    MetricPoint {
        timestamp: at,
        value,
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn read_input(start: DateTime<Utc>, end: DateTime<Utc>) -> ReadMetricsInput {
    ReadMetricsInput {
        product: ProductType::Logs,
        project_id: 1,
        query: String::new(),
        start_date: start,
        end_date: end,
        column: None,
        aggregator: Aggregator::Count,
        group_by: Vec::new(),
        bucket_count: 1,
        limit: 100,
        saved_state: None,
    }
}

#[test]
fn test_partial_state_merge_matches_single_pass() {
    let values = [3.0, 7.0, 1.0, 9.0, 4.0, 6.0];

    let mut whole = PartialState::default();
    for v in values {
        whole.observe(Some(v), None);
    }

    let mut left = PartialState::default();
    let mut right = PartialState::default();
    for v in &values[..3] {
        left.observe(Some(*v), None);
    }
    for v in &values[3..] {
        right.observe(Some(*v), None);
    }
    left.merge(&right);

    for agg in [
        Aggregator::Count,
        Aggregator::Sum,
        Aggregator::Min,
        Aggregator::Max,
        Aggregator::Avg,
        Aggregator::P50,
        Aggregator::P99,
    ] {
        assert_eq!(left.finalize(agg), whole.finalize(agg), "{agg}");
    }
}

#[test]
fn test_partial_state_counts_valueless_rows() {
    let mut state = PartialState::default();
    state.observe(None, Some("a"));
    state.observe(None, Some("a"));
    state.observe(Some(5.0), Some("b"));

    assert_eq!(state.finalize(Aggregator::Count), Some(3.0));
    assert_eq!(state.finalize(Aggregator::CountDistinct), Some(2.0));
    assert_eq!(state.finalize(Aggregator::Avg), Some(5.0));
    assert_eq!(state.finalize(Aggregator::Min), Some(5.0));
}

#[test]
fn test_partial_state_empty_finalize() {
    let state = PartialState::default();
    assert_eq!(state.finalize(Aggregator::Count), Some(0.0));
    assert_eq!(state.finalize(Aggregator::Min), None);
    assert_eq!(state.finalize(Aggregator::Avg), None);
    assert_eq!(state.finalize(Aggregator::P50), None);
}

#[test]
fn test_quantile_interpolates() {
    let mut state = PartialState::default();
    for v in [1.0, 2.0, 3.0, 4.0] {
        state.observe(Some(v), None);
    }
    assert_eq!(state.finalize(Aggregator::P50), Some(2.5));
    let p99 = state.finalize(Aggregator::P99).unwrap();
    assert!((p99 - 3.97).abs() < 1e-9);
}

#[test]
fn test_bucket_index() {
    assert_eq!(bucket_index(0, 0, 60), 0);
    assert_eq!(bucket_index(0, 59, 60), 0);
    assert_eq!(bucket_index(0, 60, 60), 1);
    assert_eq!(bucket_index(100, 40, 60), 0);
}

#[test]
fn test_filter_parse_and_match() {
    let filter = Filter::parse("status=OPEN level!=debug").unwrap();

    let mut labels = HashMap::new();
    labels.insert("status".to_string(), "OPEN".to_string());
    assert!(filter.matches(&labels));

    labels.insert("level".to_string(), "debug".to_string());
    assert!(!filter.matches(&labels));

    labels.insert("level".to_string(), "info".to_string());
    assert!(filter.matches(&labels));

    labels.remove("status");
    assert!(!filter.matches(&labels));
}

#[test]
fn test_filter_rejects_malformed_tokens() {
    assert!(Filter::parse("status").is_err());
    assert!(Filter::parse("=OPEN").is_err());
    assert!(Filter::parse("").is_ok());
}

#[test]
fn test_read_metrics_buckets_and_filters() {
    let (_dir, store) = test_store();
    let start = ts(10, 0, 0);

    store
        .write_points(
            ProductType::Logs,
            1,
            &[
                point(ts(10, 0, 30), Some(2.0), &[("service", "api")]),
                point(ts(10, 1, 10), Some(4.0), &[("service", "api")]),
                point(ts(10, 1, 20), Some(6.0), &[("service", "web")]),
            ],
        )
        .unwrap();

    let mut input = read_input(start, ts(10, 2, 0));
    input.query = "service=api".to_string();
    input.aggregator = Aggregator::Sum;
    input.bucket_count = 2;

    let buckets = store.read_metrics(&input).unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].bucket_id, 0);
    assert_eq!(buckets[0].value, Some(2.0));
    assert_eq!(buckets[1].bucket_id, 1);
    assert_eq!(buckets[1].value, Some(4.0));
    assert_eq!(buckets[0].bucket_min, start.timestamp());
    assert_eq!(buckets[0].bucket_max, start.timestamp() + 60);
}

#[test]
fn test_read_metrics_column_aggregation() {
    let (_dir, store) = test_store();

    store
        .write_points(
            ProductType::Traces,
            1,
            &[
                point(ts(10, 0, 5), None, &[("duration", "100")]),
                point(ts(10, 0, 10), None, &[("duration", "300")]),
                point(ts(10, 0, 15), None, &[("duration", "not-a-number")]),
            ],
        )
        .unwrap();

    let mut input = read_input(ts(10, 0, 0), ts(10, 1, 0));
    input.product = ProductType::Traces;
    input.column = Some("duration".to_string());
    input.aggregator = Aggregator::Avg;

    let buckets = store.read_metrics(&input).unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].value, Some(200.0));
}

#[test]
fn test_read_metrics_top_groups_limit() {
    let (_dir, store) = test_store();

    let mut points = Vec::new();
    for _ in 0..3 {
        points.push(point(ts(10, 0, 1), Some(1.0), &[("service", "busy")]));
    }
    points.push(point(ts(10, 0, 2), Some(1.0), &[("service", "quiet")]));
    points.push(point(ts(10, 0, 3), Some(1.0), &[("service", "also-quiet")]));
    store.write_points(ProductType::Logs, 1, &points).unwrap();

    let mut input = read_input(ts(10, 0, 0), ts(10, 1, 0));
    input.group_by = vec!["service".to_string()];
    input.limit = 1;

    let buckets = store.read_metrics(&input).unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].group, vec!["busy".to_string()]);
    assert_eq!(buckets[0].value, Some(3.0));
}

#[test]
fn test_incremental_merge_is_idempotent() {
    let (_dir, store) = test_store();
    let end = ts(12, 0, 0);

    store
        .write_points(
            ProductType::Metrics,
            1,
            &[
                point(ts(11, 58, 10), Some(2.0), &[]),
                point(ts(11, 58, 40), Some(4.0), &[]),
                point(ts(11, 59, 5), Some(6.0), &[]),
            ],
        )
        .unwrap();

    let mut input = read_input(ts(11, 0, 0), end);
    input.product = ProductType::Metrics;
    input.aggregator = Aggregator::Sum;
    input.saved_state = Some(SavedMetricState {
        metric_id: "alert-7".to_string(),
        checkpoints: Vec::new(),
    });

    // Two reads over the same data must not double-count.
    store.read_metrics(&input).unwrap();
    store.read_metrics(&input).unwrap();

    let buckets = store
        .aggregate_metric_states("alert-7", end, Duration::hours(1), Aggregator::Sum, None)
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].value, Some(12.0));
    assert_eq!(buckets[0].bucket_id, 0);
}

#[test]
fn test_incremental_merge_picks_up_new_blocks() {
    let (_dir, store) = test_store();
    let end = ts(12, 0, 0);

    let mut input = read_input(ts(11, 0, 0), end);
    input.product = ProductType::Metrics;
    input.aggregator = Aggregator::Count;
    input.saved_state = Some(SavedMetricState {
        metric_id: "alert-9".to_string(),
        checkpoints: Vec::new(),
    });

    store
        .write_points(ProductType::Metrics, 1, &[point(ts(11, 30, 0), Some(1.0), &[])])
        .unwrap();
    store.read_metrics(&input).unwrap();

    store
        .write_points(ProductType::Metrics, 1, &[point(ts(11, 31, 0), Some(1.0), &[])])
        .unwrap();
    store.read_metrics(&input).unwrap();

    let buckets = store
        .aggregate_metric_states("alert-9", end, Duration::hours(1), Aggregator::Count, None)
        .unwrap();
    assert_eq!(buckets[0].value, Some(2.0));

    let checkpoints = store
        .block_checkpoints("alert-9", ts(11, 0, 0), end)
        .unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].last_block_number, 2);
}

#[test]
fn test_merge_covers_whole_blocks_beyond_read_window() {
    let (_dir, store) = test_store();

    // One batch forms one block; its rows may straddle the read window.
    store
        .write_points(
            ProductType::Metrics,
            1,
            &[
                point(ts(11, 30, 0), Some(1.0), &[]),
                point(ts(12, 30, 0), Some(1.0), &[]),
            ],
        )
        .unwrap();

    let mut input = read_input(ts(11, 0, 0), ts(12, 0, 0));
    input.product = ProductType::Metrics;
    input.saved_state = Some(SavedMetricState {
        metric_id: "alert-13".to_string(),
        checkpoints: Vec::new(),
    });
    store.read_metrics(&input).unwrap();
    // Replaying must not double-count the already merged block.
    store.read_metrics(&input).unwrap();

    let buckets = store
        .aggregate_metric_states(
            "alert-13",
            ts(13, 0, 0),
            Duration::hours(2),
            Aggregator::Count,
            None,
        )
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].value, Some(2.0));
}

#[test]
fn test_aggregate_metric_states_sub_buckets() {
    let (_dir, store) = test_store();
    let end = ts(12, 0, 0);

    let mut input = read_input(ts(11, 0, 0), end);
    input.product = ProductType::Metrics;
    input.aggregator = Aggregator::Max;
    input.saved_state = Some(SavedMetricState {
        metric_id: "alert-11".to_string(),
        checkpoints: Vec::new(),
    });

    store
        .write_points(
            ProductType::Metrics,
            1,
            &[
                point(ts(11, 10, 0), Some(3.0), &[]),
                point(ts(11, 50, 0), Some(8.0), &[]),
            ],
        )
        .unwrap();
    store.read_metrics(&input).unwrap();

    let buckets = store
        .aggregate_metric_states(
            "alert-11",
            end,
            Duration::hours(1),
            Aggregator::Max,
            Some(1800),
        )
        .unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].bucket_id, 0);
    assert_eq!(buckets[0].value, Some(3.0));
    assert_eq!(buckets[1].bucket_id, 1);
    assert_eq!(buckets[1].value, Some(8.0));
    assert_eq!(buckets[1].bucket_min, ts(11, 30, 0).timestamp());
}

#[test]
fn test_last_alerting_states_ignores_other_states() {
    let (_dir, store) = test_store();

    store
        .append_state_changes(
            1,
            &[
                AlertStateChange {
                    timestamp: ts(9, 0, 0),
                    alert_id: 5,
                    group_by_key: "api".to_string(),
                    state: AlertState::Alerting,
                },
                AlertStateChange {
                    timestamp: ts(9, 30, 0),
                    alert_id: 5,
                    group_by_key: "api".to_string(),
                    state: AlertState::AlertingSilently,
                },
                AlertStateChange {
                    timestamp: ts(9, 45, 0),
                    alert_id: 5,
                    group_by_key: "web".to_string(),
                    state: AlertState::Normal,
                },
            ],
        )
        .unwrap();

    let states = store
        .last_alerting_states(1, 5, ts(8, 0, 0), ts(10, 0, 0))
        .unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].group_by_key, "api");
    assert_eq!(states[0].timestamp, ts(9, 0, 0));
}

#[test]
fn test_last_alerting_states_includes_range_end() {
    let (_dir, store) = test_store();

    store
        .append_state_changes(
            1,
            &[AlertStateChange {
                timestamp: ts(10, 0, 0),
                alert_id: 5,
                group_by_key: String::new(),
                state: AlertState::Alerting,
            }],
        )
        .unwrap();

    // A row at exactly the range end anchors the cooldown when the same
    // evaluation minute is replayed.
    let states = store
        .last_alerting_states(1, 5, ts(8, 0, 0), ts(10, 0, 0))
        .unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].timestamp, ts(10, 0, 0));
}

#[test]
fn test_alert_definitions_round_trip() {
    let dir = TempDir::new().unwrap();
    let defs = AlertDefinitionStore::new(&dir.path().join("alerts.db")).unwrap();

    let alert = AlertDefinition {
        id: 0,
        project_id: 42,
        name: "error spike".to_string(),
        product_type: "errors".to_string(),
        function_type: Aggregator::Count,
        function_column: None,
        query: Some("service=api".to_string()),
        metric_id: "m-1".to_string(),
        group_by_key: Some("service".to_string()),
        threshold_type: ThresholdType::Constant,
        threshold_condition: ThresholdCondition::Above,
        threshold_value: Some(10.0),
        threshold_window: Some(3600),
        threshold_cooldown: Some(900),
        disabled: false,
    };
    let id = defs.insert_alert(&alert).unwrap();

    let mut disabled = alert.clone();
    disabled.name = "muted".to_string();
    disabled.disabled = true;
    defs.insert_alert(&disabled).unwrap();

    let listed = defs.list_enabled_alerts().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].name, "error spike");
    assert_eq!(listed[0].threshold_condition, ThresholdCondition::Above);
    assert_eq!(listed[0].threshold_cooldown, Some(900));
}

#[test]
fn test_cleanup_removes_expired_partitions() {
    let (dir, store) = test_store();

    let old = Utc::now() - Duration::days(30);
    store
        .write_points(ProductType::Logs, 1, &[point(old, Some(1.0), &[])])
        .unwrap();
    store
        .write_points(ProductType::Logs, 1, &[point(Utc::now(), Some(1.0), &[])])
        .unwrap();

    let removed = store.cleanup(7).unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".db"))
        .collect();
    assert_eq!(remaining.len(), 1);
}
