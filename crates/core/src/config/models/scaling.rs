use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigValidator, ValidationUtils};
use crate::{CapacityError, CapacityResult};

/// 自动伸缩配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// 负载达到该百分比时扩容
    pub scale_up_threshold_percent: f64,
    /// 负载低于该百分比时缩容
    pub scale_down_threshold_percent: f64,
    /// 两次伸缩动作之间的最小间隔
    pub cooldown_ms: u64,
    pub evaluation_interval_ms: u64,
    pub health_check_interval_ms: u64,
    /// 心跳超过该时长未刷新即视为崩溃
    pub heartbeat_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// 每个时间窗口内允许的崩溃重启次数
    pub max_restarts_per_interval: usize,
    pub restart_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            scale_up_threshold_percent: 80.0,
            scale_down_threshold_percent: 20.0,
            cooldown_ms: 60_000,
            evaluation_interval_ms: 10_000,
            health_check_interval_ms: 5_000,
            heartbeat_timeout_ms: 30_000,
            heartbeat_interval_ms: 1_000,
            max_restarts_per_interval: 5,
            restart_interval_ms: 60_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl ScalingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_millis(self.restart_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl ConfigValidator for ScalingConfig {
    fn validate(&self) -> CapacityResult<()> {
        ValidationUtils::validate_count(self.min_workers, "scaling.min_workers", 1024)?;
        ValidationUtils::validate_count(self.max_workers, "scaling.max_workers", 1024)?;
        if self.min_workers > self.max_workers {
            return Err(CapacityError::config_error(format!(
                "scaling.min_workers ({}) must not exceed scaling.max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }

        ValidationUtils::validate_percent(
            self.scale_up_threshold_percent,
            "scaling.scale_up_threshold_percent",
        )?;
        ValidationUtils::validate_percent(
            self.scale_down_threshold_percent,
            "scaling.scale_down_threshold_percent",
        )?;
        if self.scale_down_threshold_percent >= self.scale_up_threshold_percent {
            return Err(CapacityError::config_error(
                "scaling.scale_down_threshold_percent must be below scaling.scale_up_threshold_percent",
            ));
        }

        ValidationUtils::validate_interval_ms(self.evaluation_interval_ms, "scaling.evaluation_interval_ms")?;
        ValidationUtils::validate_interval_ms(
            self.health_check_interval_ms,
            "scaling.health_check_interval_ms",
        )?;
        ValidationUtils::validate_interval_ms(self.heartbeat_interval_ms, "scaling.heartbeat_interval_ms")?;
        ValidationUtils::validate_interval_ms(self.restart_interval_ms, "scaling.restart_interval_ms")?;
        ValidationUtils::validate_count(
            self.max_restarts_per_interval,
            "scaling.max_restarts_per_interval",
            10_000,
        )?;
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(CapacityError::config_error(
                "scaling.heartbeat_timeout_ms must be greater than scaling.heartbeat_interval_ms",
            ));
        }

        Ok(())
    }
}
