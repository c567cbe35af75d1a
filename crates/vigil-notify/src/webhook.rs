//! Webhook delivery channel.

use crate::error::NotifyError;
use crate::{NotificationChannel, NotificationJob};
use anyhow::Result;
use async_trait::async_trait;

pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    fn render_body(&self, job: &NotificationJob) -> String {
        serde_json::json!({
            "alert_id": job.alert_id,
            "alert_name": job.alert_name,
            "project_id": job.project_id,
            "group_by_key": job.group_by_key,
            "group_key": job.group_key,
            "value": job.metric_value,
            "timestamp": job.timestamp.to_rfc3339(),
        })
        .to_string()
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, job: &NotificationJob) -> Result<()> {
        let body = self.render_body(job);
        let mut last_err: Option<NotifyError> = None;

        for attempt in 0..3u32 {
            match self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Webhook returned non-success status, retrying"
                    );
                    last_err = Some(NotifyError::Api {
                        status: status.as_u16(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook send failed, retrying"
                    );
                    last_err = Some(e.into());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt)))
                    .await;
            }
        }

        tracing::error!(url = %self.url, "Webhook failed after 3 attempts");
        Err(last_err
            .map(Into::into)
            .unwrap_or_else(|| anyhow::anyhow!("webhook send failed")))
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
