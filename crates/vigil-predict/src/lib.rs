//! Anomaly prediction client.
//!
//! Anomaly-threshold alerts send their recent bucket series to an external
//! forecasting service and compare the latest value against the returned
//! confidence interval. The service is an injected capability: deployments
//! without one wire in [`client::DisabledPredictor`], and anomaly alerts
//! then fail per-cycle instead of being silently evaluated as constant
//! thresholds.

pub mod client;
pub mod error;

use anyhow::Result;
use async_trait::async_trait;
use vigil_common::types::{MetricBucket, ThresholdCondition};

/// Forecast parameters for one alert's series.
#[derive(Debug, Clone, Copy)]
pub struct PredictionSettings {
    /// Trend changepoint flexibility passed through to the model.
    pub changepoint_prior_scale: f64,
    /// Width of the confidence interval, e.g. `0.95`.
    pub interval_width: f64,
    /// Seconds per bucket in the submitted series.
    pub interval_seconds: i64,
    /// Which bound(s) matter: the opposite bound is left unset so it can
    /// never trip the comparison.
    pub threshold_condition: ThresholdCondition,
}

/// Enriches buckets in place with forecast bounds (`yhat_lower`,
/// `yhat_upper`), one forecast per group series.
#[async_trait]
pub trait AnomalyPredictor: Send + Sync {
    async fn add_predictions(
        &self,
        buckets: &mut [MetricBucket],
        settings: PredictionSettings,
    ) -> Result<()>;
}
