use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    LogConfig, MetricsConfig, ObservabilityConfig, QueueConfig, RouterConfig, ScalingConfig,
};
use crate::config::ConfigValidator;
use crate::{CapacityError, CapacityResult};

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scaling: ScalingConfig,
    pub queues: Vec<QueueConfig>,
    pub router: RouterConfig,
    pub metrics: MetricsConfig,
    pub logging: LogConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scaling: ScalingConfig::default(),
            queues: vec![QueueConfig::new("default", "shell")],
            router: RouterConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LogConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 默认配置
    /// 2. 配置文件 (TOML)
    /// 3. 环境变量覆盖 (前缀: CAPACITY__，层级分隔符: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = [
                "config/capacity.toml",
                "capacity.toml",
                "/etc/capacity/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CAPACITY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate().context("配置验证失败")?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate().context("配置验证失败")?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> CapacityResult<()> {
        self.scaling.validate()?;
        self.router.validate()?;
        self.metrics.validate()?;
        self.logging.validate()?;
        self.observability.validate()?;

        if self.queues.is_empty() {
            return Err(CapacityError::config_error("at least one queue must be configured"));
        }
        let mut names = HashSet::new();
        for queue in &self.queues {
            queue.validate()?;
            if !names.insert(queue.name.as_str()) {
                return Err(CapacityError::config_error(format!(
                    "duplicate queue name: {}",
                    queue.name
                )));
            }
        }

        // 每个队列至少绑定一个Worker
        if self.scaling.min_workers < self.queues.len() {
            return Err(CapacityError::config_error(format!(
                "scaling.min_workers ({}) must be at least the number of queues ({})",
                self.scaling.min_workers,
                self.queues.len()
            )));
        }
        Ok(())
    }
}
