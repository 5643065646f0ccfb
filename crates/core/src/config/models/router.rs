use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigValidator, ValidationUtils};
use crate::models::{Node, NodeRole, SelectionPolicy};
use crate::{CapacityError, CapacityResult};

/// 数据库节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub endpoint: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn to_node(&self, role: NodeRole) -> Node {
        Node {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            role,
            weight: self.weight,
        }
    }
}

/// 读写路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub primary: NodeConfig,
    pub replicas: Vec<NodeConfig>,
    pub policy: SelectionPolicy,
    /// 连续失败达到该次数立即标记为不健康
    pub failure_threshold: u32,
    pub health_check_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// 延迟滑动平均的平滑系数 (0, 1]
    pub latency_smoothing: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            primary: NodeConfig::new("primary", "127.0.0.1:5432"),
            replicas: Vec::new(),
            policy: SelectionPolicy::RoundRobin,
            failure_threshold: 3,
            health_check_interval_ms: 10_000,
            probe_timeout_ms: 2_000,
            latency_smoothing: 0.2,
        }
    }
}

impl RouterConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl ConfigValidator for RouterConfig {
    fn validate(&self) -> CapacityResult<()> {
        let mut ids = HashSet::new();
        for node in std::iter::once(&self.primary).chain(self.replicas.iter()) {
            ValidationUtils::validate_not_empty(&node.id, "router.nodes.id")?;
            ValidationUtils::validate_not_empty(&node.endpoint, "router.nodes.endpoint")?;
            if node.weight == 0 {
                return Err(CapacityError::config_error(format!(
                    "router node '{}' weight must be greater than 0",
                    node.id
                )));
            }
            if !ids.insert(node.id.as_str()) {
                return Err(CapacityError::config_error(format!(
                    "duplicate router node id: {}",
                    node.id
                )));
            }
        }

        if self.failure_threshold == 0 {
            return Err(CapacityError::config_error(
                "router.failure_threshold must be greater than 0",
            ));
        }
        ValidationUtils::validate_interval_ms(
            self.health_check_interval_ms,
            "router.health_check_interval_ms",
        )?;
        ValidationUtils::validate_interval_ms(self.probe_timeout_ms, "router.probe_timeout_ms")?;
        if !(self.latency_smoothing > 0.0 && self.latency_smoothing <= 1.0) {
            return Err(CapacityError::config_error(
                "router.latency_smoothing must be in (0, 1]",
            ));
        }
        Ok(())
    }
}
