use serde::{Deserialize, Serialize};

use crate::CapacityResult;

/// 一次负载采样结果（百分比，0-100）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl LoadSample {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            memory_percent: memory_percent.clamp(0.0, 100.0),
        }
    }
}

/// 负载采样器
///
/// 生产环境基于进程CPU时间统计，测试中可以替换为固定值。
pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> CapacityResult<LoadSample>;
}
