use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Evaluation cadence in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Worker pool size: concurrent alert evaluations.
    #[serde(default = "default_eval_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// When false, anomaly alerts fail their cycle with a disabled error.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_predictor_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_urls: Vec<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Concurrent in-flight notification sends.
    #[serde(default = "default_notify_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent: default_eval_concurrent(),
        }
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            timeout_secs: default_predictor_timeout_secs(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_urls: Vec::new(),
            queue_capacity: default_queue_capacity(),
            max_concurrent: default_notify_concurrent(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_tick_secs() -> u64 {
    60
}

fn default_eval_concurrent() -> usize {
    40
}

fn default_predictor_timeout_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_notify_concurrent() -> usize {
    8
}

impl EngineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.scheduler.max_concurrent, 40);
        assert!(!config.predictor.enabled);
        assert!(config.notify.webhook_urls.is_empty());
    }

    #[test]
    fn test_partial_config_overrides() {
        let config: EngineConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/vigil"

            [scheduler]
            tick_secs = 30

            [predictor]
            enabled = true
            endpoint = "http://localhost:5001/predict"

            [notify]
            webhook_urls = ["http://hooks.internal/alerts"]
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, "/var/lib/vigil");
        assert_eq!(config.scheduler.tick_secs, 30);
        assert_eq!(config.scheduler.max_concurrent, 40);
        assert!(config.predictor.enabled);
        assert_eq!(config.predictor.endpoint, "http://localhost:5001/predict");
        assert_eq!(config.notify.webhook_urls.len(), 1);
        assert_eq!(config.notify.queue_capacity, 1024);
    }
}
