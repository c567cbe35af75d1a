//! Per-alert evaluation pipeline.

use crate::error::EvalError;
use crate::state::next_state_change;
use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use vigil_common::types::{
    AlertDefinition, AlertState, MetricBucket, ProductType, ThresholdCondition, ThresholdType,
};
use vigil_notify::{NotificationDispatcher, NotificationJob};
use vigil_predict::{AnomalyPredictor, PredictionSettings};
use vigil_store::{AlertStateStore, MetricStore, ReadMetricsInput, SavedMetricState};

/// At most this many groups are evaluated per alert, ranked by event count.
pub const TOP_GROUPS_LIMIT: usize = 100;

/// Points are accepted up to two hours out of order, so evaluation reads
/// the same window around the evaluation instant.
const READ_WINDOW_HOURS: i64 = 2;

const DEFAULT_THRESHOLD_WINDOW_SECS: i64 = 3600;

const CHANGEPOINT_PRIOR_SCALE: f64 = 0.25;

pub struct Evaluator {
    metrics: Arc<dyn MetricStore>,
    states: Arc<dyn AlertStateStore>,
    predictor: Arc<dyn AnomalyPredictor>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl Evaluator {
    pub fn new(
        metrics: Arc<dyn MetricStore>,
        states: Arc<dyn AlertStateStore>,
        predictor: Arc<dyn AnomalyPredictor>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            metrics,
            states,
            predictor,
            notifier,
        }
    }

    /// Evaluates one alert against the most recent fully-ingested minute.
    pub async fn evaluate_alert(&self, alert: &AlertDefinition) -> Result<()> {
        let now = Utc::now();
        let cur_date = now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
            - Duration::minutes(1);
        self.evaluate_alert_at(alert, cur_date).await
    }

    /// Evaluation pipeline at a fixed instant. Idempotent per `cur_date`:
    /// re-running appends duplicate state rows but the states agree, and a
    /// replay that finds its own `Alerting` row at `cur_date` lands in
    /// `AlertingSilently` through the cooldown gate, so no duplicate
    /// notification fires.
    pub async fn evaluate_alert_at(
        &self,
        alert: &AlertDefinition,
        cur_date: DateTime<Utc>,
    ) -> Result<()> {
        let start_date = cur_date - Duration::hours(READ_WINDOW_HOURS);
        let end_date = cur_date + Duration::hours(READ_WINDOW_HOURS);
        let cooldown = Duration::seconds(alert.threshold_cooldown.unwrap_or(0));

        let last_alerts: HashMap<String, DateTime<Utc>> = self
            .states
            .last_alerting_states(alert.project_id, alert.id, start_date, cur_date)?
            .into_iter()
            .map(|change| (change.group_by_key, change.timestamp))
            .collect();

        let product: ProductType = alert
            .product_type
            .parse()
            .map_err(|_| EvalError::UnknownProduct(alert.product_type.clone()))?;

        let mut query = default_filter(product).to_string();
        if let Some(user_query) = &alert.query {
            query.push_str(user_query);
        }

        let group_by: Vec<String> = alert.group_by_key.iter().cloned().collect();

        // Errors and sessions are aggregated directly from the raw read;
        // everything else goes through the checkpointed incremental path.
        let save_metric_state = product.supports_metric_state();

        let mut bucket_count = 1usize;
        let mut saved_state = None;
        if save_metric_state {
            let checkpoints =
                self.metrics
                    .block_checkpoints(&alert.metric_id, start_date, end_date)?;
            saved_state = Some(SavedMetricState {
                metric_id: alert.metric_id.clone(),
                checkpoints,
            });
            // One partial-state bucket per minute.
            bucket_count = (end_date - start_date).num_minutes().max(1) as usize;
        }

        let mut buckets = self.metrics.read_metrics(&ReadMetricsInput {
            product,
            project_id: alert.project_id,
            query,
            start_date,
            end_date,
            column: alert.function_column.clone(),
            aggregator: alert.function_type,
            group_by: group_by.clone(),
            bucket_count,
            limit: TOP_GROUPS_LIMIT,
            saved_state,
        })?;

        let threshold_window = Duration::seconds(
            alert
                .threshold_window
                .unwrap_or(DEFAULT_THRESHOLD_WINDOW_SECS),
        );
        let threshold_value = alert.threshold_value.unwrap_or_default();

        if save_metric_state {
            // Sub-bucketing only matters when forecasting a series.
            let window_seconds = match alert.threshold_type {
                ThresholdType::Anomaly => alert.threshold_window,
                ThresholdType::Constant => None,
            };

            buckets = self.metrics.aggregate_metric_states(
                &alert.metric_id,
                cur_date,
                threshold_window,
                alert.function_type,
                window_seconds,
            )?;

            if alert.threshold_type == ThresholdType::Anomaly {
                if let Some(window) = alert.threshold_window {
                    self.predictor
                        .add_predictions(
                            &mut buckets,
                            PredictionSettings {
                                changepoint_prior_scale: CHANGEPOINT_PRIOR_SCALE,
                                interval_width: threshold_value,
                                interval_seconds: window,
                                threshold_condition: alert.threshold_condition,
                            },
                        )
                        .await?;

                    // Only the most recent bucket is compared.
                    if let Some(max_id) = buckets.iter().map(|b| b.bucket_id).max() {
                        buckets.retain(|b| b.bucket_id == max_id);
                    }
                }
            }
        }

        let group_by_key = group_by.first().cloned();

        let mut state_changes = Vec::new();
        for bucket in &buckets {
            let Some(value) = bucket.value else {
                continue;
            };

            let alerting = condition_met(alert, value, bucket, threshold_value);
            let group_key = bucket.group.join("");
            let change =
                next_state_change(cur_date, alerting, alert.id, &group_key, &last_alerts, cooldown);

            if change.state == AlertState::Alerting {
                tracing::info!(
                    alert_id = alert.id,
                    group_key = %group_key,
                    value,
                    "Alert firing"
                );
                self.notifier.dispatch(NotificationJob {
                    alert_id: alert.id,
                    alert_name: alert.name.clone(),
                    project_id: alert.project_id,
                    group_by_key: group_by_key.clone(),
                    group_key,
                    metric_value: value,
                    timestamp: cur_date,
                });
            }

            state_changes.push(change);
        }

        self.states
            .append_state_changes(alert.project_id, &state_changes)?;
        Ok(())
    }
}

fn condition_met(
    alert: &AlertDefinition,
    value: f64,
    bucket: &MetricBucket,
    threshold_value: f64,
) -> bool {
    match (alert.threshold_type, alert.threshold_condition) {
        (ThresholdType::Constant, ThresholdCondition::Above) => value >= threshold_value,
        (ThresholdType::Constant, ThresholdCondition::Below) => value <= threshold_value,
        (ThresholdType::Anomaly, ThresholdCondition::Above) => {
            bucket.yhat_upper.is_some_and(|upper| value >= upper)
        }
        (ThresholdType::Anomaly, ThresholdCondition::Below) => {
            bucket.yhat_lower.is_some_and(|lower| value <= lower)
        }
        (ThresholdType::Anomaly, ThresholdCondition::Outside) => {
            match (bucket.yhat_upper, bucket.yhat_lower) {
                (Some(upper), Some(lower)) => value >= upper || value <= lower,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Product-specific filter prepended to the user query.
fn default_filter(product: ProductType) -> &'static str {
    match product {
        ProductType::Errors => "status=OPEN ",
        _ => "",
    }
}
