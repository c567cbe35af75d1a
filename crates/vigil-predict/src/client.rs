use crate::error::{PredictError, Result};
use crate::{AnomalyPredictor, PredictionSettings};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_common::types::{MetricBucket, ThresholdCondition};

/// Request body for the forecasting service. Series maps are keyed by
/// bucket id; serde renders the integer keys as JSON object keys.
#[derive(Debug, Serialize)]
struct PredictionRequest {
    changepoint_prior_scale: f64,
    interval_width: f64,
    interval_seconds: i64,
    input: TimeSeries,
}

#[derive(Debug, Serialize)]
struct TimeSeries {
    /// Bucket midpoint timestamps, `%Y-%m-%dT%H:%M:%S`.
    ds: HashMap<u64, String>,
    y: HashMap<u64, f64>,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    yhat_lower: HashMap<u64, f64>,
    #[serde(default)]
    yhat_upper: HashMap<u64, f64>,
}

/// Forecasting client over HTTP.
pub struct HttpPredictor {
    client: Client,
    endpoint: String,
}

impl HttpPredictor {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    async fn post_forecast(&self, request: &PredictionRequest) -> Result<PredictionResponse> {
        let mut attempt = 0u32;
        loop {
            let err = match self.client.post(&self.endpoint).json(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json().await?);
                    }
                    let body = resp.text().await.unwrap_or_default();
                    PredictError::Api {
                        status: status.as_u16(),
                        body,
                    }
                }
                Err(e) => e.into(),
            };
            attempt += 1;
            if attempt >= 3 {
                return Err(err);
            }
            tracing::warn!(attempt, error = %err, "Prediction request failed, retrying");
            tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt - 1)))
                .await;
        }
    }
}

#[async_trait]
impl AnomalyPredictor for HttpPredictor {
    async fn add_predictions(
        &self,
        buckets: &mut [MetricBucket],
        settings: PredictionSettings,
    ) -> anyhow::Result<()> {
        // One forecast per group series, in first-seen order.
        let mut order: Vec<Vec<String>> = Vec::new();
        let mut by_group: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for (idx, bucket) in buckets.iter().enumerate() {
            let entry = by_group.entry(bucket.group.clone()).or_default();
            if entry.is_empty() {
                order.push(bucket.group.clone());
            }
            entry.push(idx);
        }

        for group in order {
            let indices = &by_group[&group];
            let mut ds = HashMap::new();
            let mut y = HashMap::new();
            for &idx in indices {
                let bucket = &buckets[idx];
                let midpoint = (bucket.bucket_min + bucket.bucket_max) / 2;
                let stamp = Utc
                    .timestamp_opt(midpoint, 0)
                    .single()
                    .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
                    .unwrap_or_default();
                ds.insert(bucket.bucket_id, stamp);
                y.insert(bucket.bucket_id, bucket.value.unwrap_or_default());
            }

            let request = PredictionRequest {
                changepoint_prior_scale: settings.changepoint_prior_scale,
                interval_width: settings.interval_width,
                interval_seconds: settings.interval_seconds,
                input: TimeSeries { ds, y },
            };
            tracing::debug!(
                group = ?group,
                series_len = indices.len(),
                "Requesting forecast"
            );
            let response = self.post_forecast(&request).await?;
            apply_bounds(buckets, indices, &response, settings.threshold_condition);
        }
        Ok(())
    }
}

/// Copies forecast bounds onto the buckets. The bound on the side the
/// condition never inspects is left unset; missing bucket ids get a zero
/// bound, matching the service's sparse responses.
fn apply_bounds(
    buckets: &mut [MetricBucket],
    indices: &[usize],
    response: &PredictionResponse,
    condition: ThresholdCondition,
) {
    for &idx in indices {
        let bucket = &mut buckets[idx];
        if condition != ThresholdCondition::Below {
            bucket.yhat_upper = Some(
                response
                    .yhat_upper
                    .get(&bucket.bucket_id)
                    .copied()
                    .unwrap_or_default(),
            );
        }
        if condition != ThresholdCondition::Above {
            bucket.yhat_lower = Some(
                response
                    .yhat_lower
                    .get(&bucket.bucket_id)
                    .copied()
                    .unwrap_or_default(),
            );
        }
    }
}

/// Placeholder for deployments without a forecasting service; anomaly
/// alerts fail their cycle with [`PredictError::Disabled`].
pub struct DisabledPredictor;

#[async_trait]
impl AnomalyPredictor for DisabledPredictor {
    async fn add_predictions(
        &self,
        _buckets: &mut [MetricBucket],
        _settings: PredictionSettings,
    ) -> anyhow::Result<()> {
        Err(PredictError::Disabled.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(id: u64, group: &[&str], value: Option<f64>) -> MetricBucket {
        MetricBucket {
            bucket_id: id,
            bucket_min: id as i64 * 60,
            bucket_max: (id as i64 + 1) * 60,
            group: group.iter().map(|s| s.to_string()).collect(),
            value,
            yhat_lower: None,
            yhat_upper: None,
        }
    }

    #[test]
    fn test_request_serializes_integer_keys_as_strings() {
        let mut ds = HashMap::new();
        ds.insert(3u64, "2026-08-20T11:30:30".to_string());
        let mut y = HashMap::new();
        y.insert(3u64, 7.5);
        let request = PredictionRequest {
            changepoint_prior_scale: 0.25,
            interval_width: 0.95,
            interval_seconds: 60,
            input: TimeSeries { ds, y },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["input"]["y"]["3"], 7.5);
        assert_eq!(value["input"]["ds"]["3"], "2026-08-20T11:30:30");
        assert_eq!(value["interval_seconds"], 60);
    }

    #[test]
    fn test_response_parses_string_keys() {
        let response: PredictionResponse =
            serde_json::from_str(r#"{"yhat_lower":{"0":1.5},"yhat_upper":{"0":9.5}}"#).unwrap();
        assert_eq!(response.yhat_lower.get(&0), Some(&1.5));
        assert_eq!(response.yhat_upper.get(&0), Some(&9.5));
    }

    #[test]
    fn test_apply_bounds_skips_opposite_side() {
        let mut buckets = vec![bucket(0, &["api"], Some(5.0))];
        let response: PredictionResponse =
            serde_json::from_str(r#"{"yhat_lower":{"0":1.0},"yhat_upper":{"0":9.0}}"#).unwrap();

        apply_bounds(&mut buckets, &[0], &response, ThresholdCondition::Above);
        assert_eq!(buckets[0].yhat_upper, Some(9.0));
        assert_eq!(buckets[0].yhat_lower, None);

        let mut buckets = vec![bucket(0, &["api"], Some(5.0))];
        apply_bounds(&mut buckets, &[0], &response, ThresholdCondition::Below);
        assert_eq!(buckets[0].yhat_upper, None);
        assert_eq!(buckets[0].yhat_lower, Some(1.0));
    }

    #[test]
    fn test_apply_bounds_defaults_missing_ids_to_zero() {
        let mut buckets = vec![bucket(7, &["api"], Some(5.0))];
        let response: PredictionResponse = serde_json::from_str("{}").unwrap();

        apply_bounds(&mut buckets, &[0], &response, ThresholdCondition::Outside);
        assert_eq!(buckets[0].yhat_upper, Some(0.0));
        assert_eq!(buckets[0].yhat_lower, Some(0.0));
    }
}
