use thiserror::Error;

/// 容量管理核心错误类型定义
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("队列已满: {queue} (容量: {capacity})")]
    QueueFull { queue: String, capacity: usize },

    #[error("未知队列: {name}")]
    UnknownQueue { name: String },

    #[error("任务重试次数已耗尽: {task_id} (尝试次数: {attempts})")]
    TaskAttemptsExhausted { task_id: String, attempts: u32 },

    #[error("所有只读节点均不健康，已降级到主节点")]
    AllNodesUnhealthy,

    #[error("Worker崩溃: {worker_id}")]
    WorkerCrashed { worker_id: String },

    #[error("Worker数量越界: 当前 {count}, 允许范围 [{min}, {max}]")]
    ScalingBoundViolation { count: usize, min: usize, max: usize },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("死信记录未找到: 队列 {queue}, 任务 {task_id}")]
    DeadLetterNotFound { queue: String, task_id: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("查询执行错误: {0}")]
    QueryExecution(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type CapacityResult<T> = std::result::Result<T, CapacityError>;

impl CapacityError {
    pub fn queue_full<S: Into<String>>(queue: S, capacity: usize) -> Self {
        Self::QueueFull {
            queue: queue.into(),
            capacity,
        }
    }
    pub fn unknown_queue<S: Into<String>>(name: S) -> Self {
        Self::UnknownQueue { name: name.into() }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn node_not_found<S: Into<String>>(id: S) -> Self {
        Self::NodeNotFound { id: id.into() }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 调用方可修正的错误，只有这类错误会同步返回给提交方
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CapacityError::QueueFull { .. } | CapacityError::UnknownQueue { .. }
        )
    }

    /// 表示逻辑缺陷或无法继续运行的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CapacityError::ScalingBoundViolation { .. } | CapacityError::Configuration(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapacityError::TaskExecution(_)
                | CapacityError::QueryExecution(_)
                | CapacityError::Timeout(_)
                | CapacityError::WorkerCrashed { .. }
        )
    }
}

impl From<serde_json::Error> for CapacityError {
    fn from(err: serde_json::Error) -> Self {
        CapacityError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CapacityError {
    fn from(err: anyhow::Error) -> Self {
        CapacityError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for CapacityError {
    fn from(err: config::ConfigError) -> Self {
        CapacityError::Configuration(err.to_string())
    }
}
