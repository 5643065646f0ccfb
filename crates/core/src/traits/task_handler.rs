//! 任务处理器接口定义
//!
//! 队列池本身不关心任务内容，每个队列绑定一个由调用方提供的处理器，
//! 按任务类型注册。处理器返回 `Err` 视为本次尝试失败，由队列池决定
//! 重试还是转入死信。
//!
//! ## 实现自定义处理器
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use capacity_core::traits::{TaskContext, TaskHandler};
//! use capacity_core::CapacityResult;
//!
//! pub struct EmailHandler;
//!
//! #[async_trait]
//! impl TaskHandler for EmailHandler {
//!     async fn handle(&self, context: &TaskContext) -> CapacityResult<serde_json::Value> {
//!         let to = context.payload["to"].as_str().unwrap_or_default();
//!         // 长任务应在检查点处查询取消信号
//!         if context.cancel.is_cancelled() {
//!             return Ok(serde_json::json!({ "skipped": to }));
//!         }
//!         Ok(serde_json::json!({ "sent": to }))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "email"
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio::sync::watch;

use crate::models::TaskPriority;
use crate::CapacityResult;

/// 协作式取消信号
///
/// 进行中的任务不会被强制中断，处理器可以自行检查该信号提前结束。
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// 创建信号及其触发端
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// 永远不会被触发的信号
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // 发送端被丢弃后值保持为false
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待取消；发送端被丢弃且未取消时永久挂起
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// 任务执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub queue: String,
    pub worker_id: String,
    pub priority: TaskPriority,
    /// 当前是第几次尝试（从1开始）
    pub attempt: u32,
    pub max_attempts: u32,
    pub payload: serde_json::Value,
    pub cancel: CancellationSignal,
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 执行任务，返回处理结果
    async fn handle(&self, context: &TaskContext) -> CapacityResult<serde_json::Value>;

    /// 处理器名称
    fn name(&self) -> &str;
}
