use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigValidator, ValidationUtils};
use crate::{CapacityError, CapacityResult};

/// 单个指标的告警阈值
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdConfig {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// 指标与告警配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 每个指标保留的样本数
    pub history_size: usize,
    /// 计算趋势所需的最少样本数
    pub trend_min_samples: usize,
    pub trend_change_percent: f64,
    pub sampling_interval_ms: u64,
    /// 同一指标同一级别两次告警的最小间隔
    pub alert_cooldown_ms: u64,
    pub alert_retention_ms: u64,
    pub max_alerts: usize,
    /// 连续越线的样本数达到该值才触发告警
    pub sustain_samples: usize,
    pub thresholds: BTreeMap<String, ThresholdConfig>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let thresholds = [
            ("cpu", 70.0, 90.0),
            ("memory", 80.0, 95.0),
            ("error_rate", 5.0, 10.0),
            ("response_time", 1000.0, 3000.0),
            ("queue_depth", 500.0, 900.0),
        ]
        .into_iter()
        .map(|(name, warning, critical)| {
            (name.to_string(), ThresholdConfig::new(warning, critical))
        })
        .collect();

        Self {
            history_size: 100,
            trend_min_samples: 10,
            trend_change_percent: 10.0,
            sampling_interval_ms: 5_000,
            alert_cooldown_ms: 300_000,
            alert_retention_ms: 86_400_000,
            max_alerts: 1000,
            sustain_samples: 3,
            thresholds,
        }
    }
}

impl MetricsConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }

    pub fn alert_retention(&self) -> Duration {
        Duration::from_millis(self.alert_retention_ms)
    }

    pub fn with_threshold(mut self, metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        self.thresholds
            .insert(metric.into(), ThresholdConfig::new(warning, critical));
        self
    }
}

impl ConfigValidator for MetricsConfig {
    fn validate(&self) -> CapacityResult<()> {
        ValidationUtils::validate_count(self.history_size, "metrics.history_size", 100_000)?;
        ValidationUtils::validate_count(self.max_alerts, "metrics.max_alerts", 1_000_000)?;
        ValidationUtils::validate_count(self.sustain_samples, "metrics.sustain_samples", self.history_size)?;
        ValidationUtils::validate_interval_ms(self.sampling_interval_ms, "metrics.sampling_interval_ms")?;
        ValidationUtils::validate_interval_ms(self.alert_retention_ms, "metrics.alert_retention_ms")?;
        ValidationUtils::validate_percent(self.trend_change_percent, "metrics.trend_change_percent")?;

        if self.trend_min_samples < 3 || self.trend_min_samples > self.history_size {
            return Err(CapacityError::config_error(format!(
                "metrics.trend_min_samples must be between 3 and history_size ({})",
                self.history_size
            )));
        }

        for (metric, threshold) in &self.thresholds {
            ValidationUtils::validate_not_empty(metric, "metrics.thresholds")?;
            if !threshold.warning.is_finite() || !threshold.critical.is_finite() {
                return Err(CapacityError::config_error(format!(
                    "metrics.thresholds.{metric} must be finite"
                )));
            }
            if threshold.warning >= threshold.critical {
                return Err(CapacityError::config_error(format!(
                    "metrics.thresholds.{metric}: warning ({}) must be below critical ({})",
                    threshold.warning, threshold.critical
                )));
            }
        }
        Ok(())
    }
}
