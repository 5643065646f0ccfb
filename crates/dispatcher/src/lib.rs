//! 任务队列池
//!
//! 每个命名队列是一个有界的两级优先级队列，绑定一个按任务类型注册的处理器。
//! 队列池实现 [`WorkerRuntime`](capacity_core::traits::WorkerRuntime)，
//! Worker的数量和生命周期由容量管理器决定，这里只负责分发循环。

pub mod pool;
pub mod queue;
pub mod registry;
pub mod shell;

pub use pool::TaskQueuePool;
pub use queue::{FailureDisposition, NamedQueue};
pub use registry::HandlerRegistry;
pub use shell::{ShellTaskHandler, ShellTaskParams};
