use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务优先级
///
/// 只有两个层级，层级内严格先进先出。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    #[default]
    Normal,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::Normal => "normal",
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "urgent" | "high" => Ok(TaskPriority::Urgent),
            "normal" => Ok(TaskPriority::Normal),
            other => Err(format!("无效的任务优先级: {other}")),
        }
    }
}

/// 队列中的任务条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub queue: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(
        queue: impl Into<String>,
        payload: serde_json::Value,
        priority: TaskPriority,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            queue: queue.into(),
            payload,
            priority,
            enqueued_at: Utc::now(),
            attempts: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// 死信记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub entry: QueueEntry,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(entry: QueueEntry, reason: impl Into<String>) -> Self {
        Self {
            entry,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}
