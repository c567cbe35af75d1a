//! Notification delivery.
//!
//! Evaluation tasks hand finished alert notifications to a
//! [`NotificationDispatcher`] and move on; the default implementation
//! ([`queue::NotifyQueue`]) buffers jobs on a bounded channel and fans them
//! out to the configured channels with bounded concurrency. Delivery
//! failures are logged, never propagated back into evaluation.

pub mod error;
pub mod queue;
pub mod webhook;


use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One notification to deliver, built when an alert transitions to the
/// notifying state for a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub alert_id: i64,
    pub alert_name: String,
    pub project_id: i64,
    /// The label the alert groups by, when any.
    pub group_by_key: Option<String>,
    /// The concrete group value that crossed the threshold.
    pub group_key: String,
    pub metric_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget handoff from evaluation to delivery. Must never block:
/// implementations drop (and log) when saturated.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, job: NotificationJob);
}

/// A concrete delivery target (webhook endpoint, etc.).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, job: &NotificationJob) -> Result<()>;

    fn channel_name(&self) -> &str;
}
