use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::CancellationSignal;
use crate::models::{WorkerCounters, WorkerState};
use crate::CapacityResult;

/// 队列在Worker分配时的权重与积压
#[derive(Debug, Clone, PartialEq)]
pub struct QueueLoad {
    pub name: String,
    pub weight: usize,
    pub depth: usize,
}

/// 单个Worker运行所需的上下文
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: String,
    pub queue: String,
    pub counters: Arc<WorkerCounters>,
    /// 置为true后不再领取新任务，当前任务完成后退出
    pub drain: watch::Receiver<bool>,
    pub cancel: CancellationSignal,
    pub heartbeat_interval: Duration,
}

impl WorkerContext {
    pub fn is_draining(&self) -> bool {
        *self.drain.borrow()
    }

    pub fn beat(&self) {
        self.counters.beat();
    }

    /// 确认启动完成，starting -> online
    pub fn mark_online(&self) -> bool {
        self.counters.beat();
        self.counters
            .transition(WorkerState::Starting, WorkerState::Online)
    }

    /// 等待排空信号；发送端被丢弃视为排空
    pub async fn drained(&mut self) {
        loop {
            if *self.drain.borrow_and_update() {
                return;
            }
            if self.drain.changed().await.is_err() {
                return;
            }
        }
    }
}

/// 容量管理器与任务队列池之间的接缝
///
/// 容量管理器负责Worker的数量与生命周期，队列池负责Worker在队列上的分发循环。
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// 当前可分配Worker的队列
    fn queue_loads(&self) -> Vec<QueueLoad>;

    /// 在 `context.queue` 上运行分发循环，排空后返回 `Ok(())`
    async fn run_worker(&self, context: WorkerContext) -> CapacityResult<()>;
}
