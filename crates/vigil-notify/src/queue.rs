//! Bounded delivery queue.

use crate::{NotificationChannel, NotificationDispatcher, NotificationJob};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Buffers notification jobs and fans them out to every configured channel
/// with at most `max_concurrent` in-flight sends.
///
/// Dispatch never blocks: when the buffer is full the job is dropped and
/// logged. A dropped notification is recoverable (the alert re-fires after
/// its cooldown); a stalled evaluation cycle is not.
pub struct NotifyQueue {
    tx: mpsc::Sender<NotificationJob>,
}

impl NotifyQueue {
    /// Starts the consumer task. Must be called from within a Tokio
    /// runtime.
    pub fn start(
        channels: Vec<Arc<dyn NotificationChannel>>,
        capacity: usize,
        max_concurrent: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<NotificationJob>(capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                for channel in &channels {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        // Closed semaphore means shutdown.
                        Err(_) => return,
                    };
                    let channel = Arc::clone(channel);
                    let job = job.clone();
                    tokio::spawn(async move {
                        if let Err(e) = channel.send(&job).await {
                            tracing::error!(
                                channel = channel.channel_name(),
                                alert_id = job.alert_id,
                                error = %e,
                                "Notification delivery failed"
                            );
                        }
                        drop(permit);
                    });
                }
            }
        });

        Self { tx }
    }
}

impl NotificationDispatcher for NotifyQueue {
    fn dispatch(&self, job: NotificationJob) {
        if let Err(e) = self.tx.try_send(job) {
            let job = match &e {
                mpsc::error::TrySendError::Full(job) => job,
                mpsc::error::TrySendError::Closed(job) => job,
            };
            tracing::warn!(
                alert_id = job.alert_id,
                group_key = %job.group_key,
                "Notification queue saturated, dropping job"
            );
        }
    }
}
