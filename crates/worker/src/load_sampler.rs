use std::sync::{Mutex, PoisonError};

use capacity_core::traits::{LoadSample, LoadSampler};
use capacity_core::{CapacityError, CapacityResult};
use sysinfo::{Pid, System};
use tracing::debug;

/// 基于本进程CPU时间与常驻内存的负载采样器
///
/// CPU使用率按可用并行度归一化，首次采样没有参照区间，读数为0。
pub struct ProcessLoadSampler {
    system: Mutex<System>,
    pid: Pid,
    parallelism: f64,
}

impl ProcessLoadSampler {
    pub fn new() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            pid: Pid::from(std::process::id() as usize),
            parallelism,
        }
    }
}

impl Default for ProcessLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for ProcessLoadSampler {
    fn sample(&self) -> CapacityResult<LoadSample> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_process(self.pid);
        system.refresh_memory();

        let process = system
            .process(self.pid)
            .ok_or_else(|| CapacityError::Internal(format!("进程信息不可用: {}", self.pid)))?;

        let cpu_percent = f64::from(process.cpu_usage()) / self.parallelism;
        let total_memory = system.total_memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            process.memory() as f64 / total_memory as f64 * 100.0
        };

        debug!(cpu_percent, memory_percent, "Process load sampled");
        Ok(LoadSample::new(cpu_percent, memory_percent))
    }
}
