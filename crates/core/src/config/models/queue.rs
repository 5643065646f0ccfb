use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigValidator, ValidationUtils};
use crate::{CapacityError, CapacityResult};

/// 单个命名队列的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    /// 处理器注册表中的任务类型
    pub handler: String,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Worker分配权重
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    /// 队列为空时的空闲退避
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

fn default_capacity() -> usize {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_idle_backoff_ms() -> u64 {
    100
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            capacity: default_capacity(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            task_timeout_ms: None,
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_base_delay_ms = base_ms;
        self.retry_max_delay_ms = max_ms;
        self
    }

    pub fn with_task_timeout(mut self, timeout_ms: u64) -> Self {
        self.task_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_idle_backoff(mut self, idle_backoff_ms: u64) -> Self {
        self.idle_backoff_ms = idle_backoff_ms;
        self
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    /// 第 `attempt` 次失败后的重试延迟（指数退避，封顶）
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if self.retry_base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay = self.retry_base_delay_ms as f64 * self.retry_backoff_multiplier.powi(exponent);
        let capped = delay.min(self.retry_max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> CapacityResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "queues.name")?;
        ValidationUtils::validate_not_empty(&self.handler, "queues.handler")?;
        ValidationUtils::validate_count(self.capacity, "queues.capacity", 10_000_000)?;
        ValidationUtils::validate_count(self.workers, "queues.workers", 1024)?;
        ValidationUtils::validate_interval_ms(self.idle_backoff_ms, "queues.idle_backoff_ms")?;
        if self.max_attempts == 0 {
            return Err(CapacityError::config_error(format!(
                "queues.max_attempts for '{}' must be greater than 0",
                self.name
            )));
        }
        if self.retry_backoff_multiplier < 1.0 || !self.retry_backoff_multiplier.is_finite() {
            return Err(CapacityError::config_error(format!(
                "queues.retry_backoff_multiplier for '{}' must be >= 1.0",
                self.name
            )));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(CapacityError::config_error(format!(
                "queues.retry_max_delay_ms for '{}' must not be below retry_base_delay_ms",
                self.name
            )));
        }
        if let Some(timeout_ms) = self.task_timeout_ms {
            ValidationUtils::validate_interval_ms(timeout_ms, "queues.task_timeout_ms")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_backoff() {
        let config = QueueConfig::new("emails", "email").with_retry_delay(100, 1000);
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(400));
        assert_eq!(config.retry_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_base_delay_disables_backoff() {
        let config = QueueConfig::new("emails", "email").with_retry_delay(0, 0);
        assert_eq!(config.retry_delay(5), Duration::ZERO);
    }

    #[test]
    fn test_queue_config_validation() {
        let config = QueueConfig::new("emails", "email");
        assert!(config.validate().is_ok());

        assert!(config.clone().with_capacity(0).validate().is_err());
        assert!(config.clone().with_max_attempts(0).validate().is_err());
        assert!(config.clone().with_workers(0).validate().is_err());

        let mut invalid = config.clone();
        invalid.handler = String::new();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_queue_config_defaults_from_toml() {
        let config: QueueConfig = toml::from_str(
            r#"
            name = "reports"
            handler = "shell"
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.workers, 1);
        assert!(config.task_timeout_ms.is_none());
    }
}
