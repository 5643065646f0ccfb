//! 容量管理器
//!
//! 在 `[min_workers, max_workers]` 范围内根据负载增减Worker，
//! 并替换崩溃或失去心跳的Worker。

pub mod load_sampler;
pub mod manager;
pub mod restart_guard;

pub use load_sampler::ProcessLoadSampler;
pub use manager::{CapacityManager, ScalingDecision};
pub use restart_guard::RestartGuard;
