use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigValidator;
use crate::{CapacityError, CapacityResult};

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("无效的日志格式: {other}")),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ConfigValidator for LogConfig {
    fn validate(&self) -> CapacityResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(CapacityError::config_error(format!(
                "Invalid log level: {}. Valid levels: {:?}",
                self.level, valid_levels
            )));
        }
        Ok(())
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Prometheus抓取端点监听地址，未设置时不启动
    pub prometheus_listen: Option<String>,
}

impl ObservabilityConfig {
    pub fn prometheus_addr(&self) -> CapacityResult<Option<SocketAddr>> {
        self.prometheus_listen
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|e| {
                    CapacityError::config_error(format!(
                        "observability.prometheus_listen is not a socket address: {addr} ({e})"
                    ))
                })
            })
            .transpose()
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> CapacityResult<()> {
        self.prometheus_addr().map(|_| ())
    }
}
