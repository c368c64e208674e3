use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Retention policy applied by the broker's state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdbConfig {
    /// Days a per-day processed/failed counter is kept
    pub stats_retention_days: i64,
    /// Upper bound on the number of entries in the dead set. Values below 1
    /// act as 1, so a kill never discards the task it just recorded.
    pub max_dead_tasks: usize,
    /// Dead tasks older than this are dropped on the next kill
    pub dead_task_retention_days: i64,
}

impl Default for RdbConfig {
    fn default() -> Self {
        RdbConfig {
            stats_retention_days: 90,
            max_dead_tasks: 10_000,
            dead_task_retention_days: 90,
        }
    }
}

impl RdbConfig {
    pub fn stats_ttl(&self) -> Duration {
        Duration::days(self.stats_retention_days)
    }

    pub fn dead_task_max_age(&self) -> Duration {
        Duration::days(self.dead_task_retention_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub redis_url: String,
    pub poll_interval_ms: u64,
    /// Run a recovery sweep of in-progress tasks before polling
    pub recover_on_startup: bool,
    /// Queues served by this deployment; only reported in logs
    pub queues: Vec<String>,
    pub log_level: String,
    pub rdb: RdbConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            poll_interval_ms: 1000,
            recover_on_startup: false,
            queues: vec![task_queue_core::DEFAULT_QUEUE.to_string()],
            log_level: "info".to_string(),
            rdb: RdbConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(!config.recover_on_startup);
        assert_eq!(config.rdb.max_dead_tasks, 10_000);
        assert_eq!(config.rdb.stats_ttl(), Duration::days(90));
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "redis_url: redis://cache:6380/2\nqueues: [critical, default]\nrdb:\n  max_dead_tasks: 50"
        )
        .unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.redis_url, "redis://cache:6380/2");
        assert_eq!(config.queues, vec!["critical", "default"]);
        assert_eq!(config.rdb.max_dead_tasks, 50);
        assert_eq!(config.rdb.dead_task_retention_days, 90);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(SchedulerConfig::from_file("/nonexistent/tq-scheduler.yaml").is_err());
    }
}
