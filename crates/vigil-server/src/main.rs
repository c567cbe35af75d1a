mod config;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;
use vigil_alert::evaluator::Evaluator;
use vigil_alert::scheduler::AlertScheduler;
use vigil_notify::queue::NotifyQueue;
use vigil_notify::webhook::WebhookChannel;
use vigil_notify::NotificationChannel;
use vigil_predict::client::{DisabledPredictor, HttpPredictor};
use vigil_predict::AnomalyPredictor;
use vigil_store::definitions::AlertDefinitionStore;
use vigil_store::engine::SqliteMetricStore;

use config::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/vigil.toml");
    let config = EngineConfig::load(config_path)?;

    tracing::info!(
        data_dir = %config.data_dir,
        tick_secs = config.scheduler.tick_secs,
        workers = config.scheduler.max_concurrent,
        predictor = config.predictor.enabled,
        "vigil-server starting"
    );

    let data_dir = Path::new(&config.data_dir);
    let store = Arc::new(SqliteMetricStore::new(&data_dir.join("metrics"))?);
    let definitions = Arc::new(AlertDefinitionStore::new(&data_dir.join("alerts.db"))?);

    let predictor: Arc<dyn AnomalyPredictor> = if config.predictor.enabled {
        Arc::new(HttpPredictor::new(
            &config.predictor.endpoint,
            config.predictor.timeout_secs,
        )?)
    } else {
        Arc::new(DisabledPredictor)
    };

    let channels: Vec<Arc<dyn NotificationChannel>> = config
        .notify
        .webhook_urls
        .iter()
        .map(|url| Arc::new(WebhookChannel::new(url)) as Arc<dyn NotificationChannel>)
        .collect();
    let dispatcher = Arc::new(NotifyQueue::start(
        channels,
        config.notify.queue_capacity,
        config.notify.max_concurrent,
    ));

    let evaluator = Arc::new(Evaluator::new(
        store.clone(),
        store.clone(),
        predictor,
        dispatcher,
    ));
    let scheduler = Arc::new(AlertScheduler::new(
        definitions,
        evaluator,
        config.scheduler.tick_secs,
        config.scheduler.max_concurrent,
    ));

    // Hourly partition retention sweep.
    let cleanup_store = store.clone();
    let retention_days = config.retention_days;
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            match cleanup_store.cleanup(retention_days) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Partition cleanup complete"),
                Err(e) => tracing::error!(error = %e, "Partition cleanup failed"),
            }
        }
    });

    tokio::select! {
        _ = scheduler.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping");
        }
    }

    Ok(())
}
